use crate::cli::{CliContext, OutputFormatter};
use crate::error::RouterResult;
use clap::Args;

#[derive(Args)]
pub struct ContextArgs {
    /// Query to select services for
    pub query: String,

    /// Print the full system prompt instead of the service context only
    #[arg(long)]
    pub full: bool,

    /// Ask the inference server how many tokens the system prompt takes
    #[arg(long)]
    pub tokens: bool,
}

pub async fn execute(ctx: &mut CliContext, args: ContextArgs) -> RouterResult<()> {
    let formatter = OutputFormatter::new(ctx.output_format);
    let router = ctx.router()?;
    let prepared = router.prepare(&args.query).await;

    let token_count = if args.tokens {
        router.count_prompt_tokens(&prepared).await
    } else {
        None
    };

    if formatter.is_json() {
        formatter.json(&serde_json::json!({
            "prepared": prepared,
            "tokens": token_count,
        }));
        return Ok(());
    }

    if prepared.services.is_empty() {
        formatter.warning(&format!("No relevant service for '{}'", args.query));
    } else {
        formatter.kv("Services", &prepared.service_names().join(", "));
    }
    if args.tokens {
        formatter.kv(
            "Tokens",
            &token_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "model not loaded".to_string()),
        );
    }

    if args.full {
        formatter.section("System prompt");
        formatter.block(&prepared.system_prompt);
    } else {
        formatter.section("Service context");
        formatter.block(&prepared.context);
    }
    if let Some(devices) = &prepared.device_context {
        formatter.section("Device context");
        formatter.block(devices);
    }
    Ok(())
}
