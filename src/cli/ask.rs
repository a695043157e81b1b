//! `crewclause ask` command.

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crewclause::cache::CacheContext;
use crewclause::config::Config;
use crewclause::{AnswerSource, AskRequest};

/// Parse repeated `key=value` arguments into a cache context.
pub(crate) fn parse_context(pairs: &[String]) -> Result<CacheContext> {
    let mut context = CacheContext::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Invalid --context '{pair}', expected KEY=VALUE");
        };
        if key.trim().is_empty() {
            bail!("Invalid --context '{pair}', key is empty");
        }
        context.insert(key.trim(), value);
    }
    Ok(context)
}

/// Answer one question. Ctrl-C cancels the in-flight request.
pub(crate) async fn cmd_ask(config: Config, query: String, context: Vec<String>) -> Result<()> {
    let request = AskRequest::new(query).with_context(parse_context(&context)?);
    let (assistant, handle) = super::build_assistant(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            on_signal.cancel();
        }
    });

    let result = assistant.answer(&request, &cancel).await;
    if let Some(handle) = handle {
        handle.shutdown().await;
    }

    let answer = result.context("Failed to get an answer")?;
    println!("{}", answer.text);
    if answer.source == AnswerSource::Cache {
        eprintln!("(cached)");
    }
    Ok(())
}
