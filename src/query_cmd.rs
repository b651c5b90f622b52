use anyhow::{bail, Result};

use crate::config::Config;
use crate::service::QueryService;

/// Run `apidoc query`: one retrieval through the service.
///
/// With `json` the envelope is printed as-is and a failed query still
/// exits successfully, since the failure is part of the payload. Without
/// it the snippet block is printed and a failed query is an error.
pub async fn run_query(
    config: &Config,
    prompt: &str,
    class_top_k: Option<usize>,
    method_top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let service = QueryService::load(config)?;
    let envelope = service.query_with_k(prompt, class_top_k, method_top_k).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    match (envelope.success, envelope.data, envelope.error) {
        (true, Some(data), _) => {
            print!("{}", data);
            Ok(())
        }
        (_, _, Some(error)) => bail!("Query failed: {}", error),
        _ => bail!("Query failed"),
    }
}
