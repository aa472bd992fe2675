//! Schema command implementation.

use anyhow::Result;
use k2k_core::schema::{provider_from_config, Schema};
use k2k_core::Config;

/// Fetch the schema the pipeline would resolve at startup and print it.
pub async fn run(config: &Config) -> Result<()> {
    let provider = provider_from_config(config)?;
    let subject = config
        .schema_registry
        .subject_for(&config.kafka.input_topic);

    println!("Resolving subject '{}' from {}...\n", subject, provider.location());

    let schema = provider.latest_schema(&subject).await?;
    print!("{}", describe(&schema));
    Ok(())
}

fn describe(schema: &Schema) -> String {
    let width = schema
        .fields()
        .iter()
        .map(|field| field.name.len())
        .max()
        .unwrap_or(0);

    let mut out = format!("Schema: {} ({} fields)\n", schema.name(), schema.len());
    for field in schema.fields() {
        out.push_str(&format!(
            "  {:<width$}  {}\n",
            field.name,
            field.field_type,
            width = width
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_aligns_fields() {
        let schema = Schema::from_json_str(
            r#"{"type":"record","name":"UserLogin","fields":[
                {"name":"user_id","type":"string"},
                {"name":"timestamp","type":"long"},
                {"name":"note","type":["null","string"]}
            ]}"#,
        )
        .unwrap();

        let text = describe(&schema);
        assert!(text.starts_with("Schema: UserLogin (3 fields)\n"));
        assert!(text.contains("  user_id    string\n"));
        assert!(text.contains("  timestamp  long\n"));
        assert!(text.contains("  note       [null, string]\n"));
    }
}
