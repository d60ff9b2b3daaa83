use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;

use crate::cli::utils::{load_entity, parse_json_arg, print_section};
use crate::cli::OutputFormat;
use crate::condition::{ConditionCompiler, ConditionExpr, VariableContext};
use crate::filter::sql::render_where;
use crate::types::RequestContext;

#[derive(Subcommand)]
pub enum ConditionCommands {
    #[command(about = "Resolve variables and compile a row condition for one user")]
    Compile {
        #[arg(long, help = "Path to the YAML schema file")]
        schema: PathBuf,
        #[arg(long, help = "Entity name")]
        entity: String,
        #[arg(long, help = "Condition expression as JSON")]
        condition: String,
        #[arg(long, default_value = "default", help = "Tenant id bound to $tenant.id")]
        tenant: String,
        #[arg(long, help = "User id bound to $user.id")]
        user: String,
        #[arg(long = "role", help = "Role bound into $user.roles (repeatable)")]
        roles: Vec<String>,
    },
}

pub async fn handle(cmd: ConditionCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConditionCommands::Compile { schema, entity, condition, tenant, user, roles } => {
            let entity = load_entity(&schema, &entity).await?;
            let expr = ConditionExpr::parse(&parse_json_arg("condition", &condition)?)?;

            let ctx = RequestContext::new(tenant, user);
            let vars = VariableContext::for_request(&ctx, &roles);
            let predicate = ConditionCompiler::new(&vars).with_entity(&entity).compile(&expr)?;
            let document = predicate.to_document();
            let sql = render_where(&predicate);

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({ "where": document, "sql": sql.query }))?)
                }
                OutputFormat::Text => {
                    print_section("Where", &document)?;
                    println!("SQL: {}", sql.query);
                }
            }
            Ok(())
        }
    }
}
