use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;

use crate::cli::utils::{load_entity, parse_json_arg, print_section};
use crate::cli::OutputFormat;
use crate::filter::sql::{render_order, render_where};
use crate::filter::{Filter, FilterCompiler, FilterOrder};

#[derive(Subcommand)]
pub enum FilterCommands {
    #[command(about = "Compile a filter list into a where document and SQL")]
    Compile {
        #[arg(long, help = "Path to the YAML schema file")]
        schema: PathBuf,
        #[arg(long, help = "Entity name")]
        entity: String,
        #[arg(long, help = "JSON array of {field, operator, value} filters")]
        filters: String,
        #[arg(long, help = "Sort order (JSON or a bare field name)")]
        sort: Option<String>,
    },
}

pub async fn handle(cmd: FilterCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        FilterCommands::Compile { schema, entity, filters, sort } => {
            let entity = load_entity(&schema, &entity).await?;
            let filters: Vec<Filter> = serde_json::from_value(parse_json_arg("filters", &filters)?)?;
            let predicate = FilterCompiler::new(&entity).compile(&filters)?;

            let sort = match sort {
                Some(raw) => {
                    let value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
                    FilterOrder::parse(&value)?
                }
                None => Vec::new(),
            };

            let document = predicate.to_document();
            let sql = render_where(&predicate);
            let order = render_order(&entity, &sort);
            let params: Vec<String> = sql.params.iter().map(|p| format!("{:?}", p)).collect();

            match output_format {
                OutputFormat::Json => {
                    let output = json!({
                        "where": document,
                        "sql": sql.query,
                        "order": order,
                        "params": params,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    print_section("Where", &document)?;
                    println!("SQL: {}", sql.query);
                    if !order.is_empty() {
                        println!("Order: {}", order);
                    }
                    for (i, param) in params.iter().enumerate() {
                        println!("  ${} = {}", i + 1, param);
                    }
                }
            }
            Ok(())
        }
    }
}
