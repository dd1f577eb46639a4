use crate::cli::{CliContext, OutputFormatter};
use crate::error::RouterResult;
use crate::router::{AskOptions, QueryOutcome};
use clap::Args;

#[derive(Args)]
pub struct AskArgs {
    /// Natural language request
    pub query: String,

    /// Ask the model but do not execute its choice
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(ctx: &mut CliContext, args: AskArgs) -> RouterResult<()> {
    let formatter = OutputFormatter::new(ctx.output_format);
    let router = ctx.router()?;
    let already_published = ctx.bus().published().len();

    let report = router
        .ask(&args.query, AskOptions::default().dry_run(args.dry_run).source("cli"))
        .await;

    if formatter.is_json() {
        formatter.json(&report);
        return Ok(());
    }

    formatter.kv("Services", &report.prepared.service_names().join(", "));
    if let Some(completion) = &report.completion {
        formatter.kv("Model", completion);
    }
    formatter.kv("Outcome", report.outcome.label());

    for message in ctx.bus().published().iter().skip(already_published) {
        formatter.list_item(&format!(
            "published {} {}",
            message.topic,
            String::from_utf8_lossy(&message.payload)
        ));
    }

    let text = report.user_message();
    match &report.outcome {
        QueryOutcome::Failed(_) => formatter.error(&text),
        QueryOutcome::ModelUnavailable(reason) => {
            formatter.warning(&format!("{} ({})", text, reason))
        }
        QueryOutcome::NoRelevantService | QueryOutcome::NoMatch => formatter.warning(&text),
        _ => formatter.success(&text),
    }
    Ok(())
}
