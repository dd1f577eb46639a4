use crate::cli::{CliContext, OutputFormatter};
use crate::error::RouterResult;
use clap::Args;

#[derive(Args)]
pub struct GrammarArgs {
    /// Query to select services for
    pub query: String,
}

pub async fn execute(ctx: &mut CliContext, args: GrammarArgs) -> RouterResult<()> {
    let formatter = OutputFormatter::new(ctx.output_format);
    let router = ctx.router()?;
    let prepared = router.prepare(&args.query).await;

    if formatter.is_json() {
        formatter.json(&serde_json::json!({
            "query": prepared.query,
            "services": prepared.service_names(),
            "grammar": prepared.grammar,
        }));
        return Ok(());
    }

    ctx.debug(&format!("Services: {:?}", prepared.service_names()));
    formatter.block(&prepared.grammar);
    Ok(())
}
