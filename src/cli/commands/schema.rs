use clap::Subcommand;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::cli::utils::{load_entity, output_error, output_success, print_section};
use crate::cli::OutputFormat;
use crate::schema::{MemorySchemaRegistry, SchemaRegistry};

#[derive(Subcommand)]
pub enum SchemaCommands {
    #[command(about = "Validate a YAML schema file and list its entities")]
    Check {
        #[arg(help = "Path to the YAML schema file")]
        file: PathBuf,
    },

    #[command(about = "Show the fields of one entity")]
    Fields {
        #[arg(help = "Path to the YAML schema file")]
        file: PathBuf,
        #[arg(help = "Entity name")]
        entity: String,
    },
}

pub async fn handle(cmd: SchemaCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        SchemaCommands::Check { file } => {
            let registry = match MemorySchemaRegistry::load_yaml_file(&file) {
                Ok(registry) => registry,
                Err(e) => {
                    output_error(&output_format, &e.to_string(), Some("SCHEMA_INVALID"))?;
                    return Err(e.into());
                }
            };

            let mut entities = Vec::new();
            for name in registry.entity_names() {
                let entity = registry.find_entity(&name).await?;
                entities.push(json!({ "name": entity.name, "fields": entity.fields.len() }));
            }

            if let OutputFormat::Text = output_format {
                for entity in &entities {
                    println!("{:<24} {} fields", entity["name"].as_str().unwrap_or_default(), entity["fields"]);
                }
            }
            output_success(
                &output_format,
                &format!("{} is valid ({} entities)", file.display(), entities.len()),
                Some(json!({ "entities": entities })),
            )
        }
        SchemaCommands::Fields { file, entity } => {
            let entity = load_entity(&file, &entity).await?;
            let fields: Vec<Value> = entity
                .fields
                .iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "label": f.display_label(),
                        "type": f.field_type,
                        "required": f.required,
                    })
                })
                .collect();

            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&json!({ "fields": fields }))?),
                OutputFormat::Text => print_section(&entity.name, &Value::Array(fields))?,
            }
            Ok(())
        }
    }
}
