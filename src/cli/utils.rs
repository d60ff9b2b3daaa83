use serde_json::{json, Value};
use std::path::Path;

use crate::cli::OutputFormat;
use crate::schema::{EntityDefinition, MemorySchemaRegistry, SchemaRegistry};

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(Value::Object(extra)), Some(object)) = (data, response.as_object_mut()) {
                object.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(output_format: &OutputFormat, message: &str, error_code: Option<&str>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": false,
                "error": message
            });

            if let Some(code) = error_code {
                response["error_code"] = json!(code);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
    Ok(())
}

/// Print a labelled JSON section in text mode
pub fn print_section(label: &str, value: &Value) -> anyhow::Result<()> {
    println!("{}:", label);
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Load a schema file and pick one entity out of it
pub async fn load_entity(schema: &Path, entity: &str) -> anyhow::Result<std::sync::Arc<EntityDefinition>> {
    let registry = MemorySchemaRegistry::load_yaml_file(schema)?;
    Ok(registry.find_entity(entity).await?)
}

/// Parse a JSON argument, naming the argument on failure
pub fn parse_json_arg(name: &str, raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("Invalid JSON for --{}: {}", name, e))
}
