use crate::cli::{CliContext, OutputFormatter};
use crate::error::RouterResult;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ServiceRow {
    name: String,
    topic: Option<String>,
    commands: usize,
    reply_commands: Vec<String>,
    skipped: bool,
}

pub async fn execute(ctx: &mut CliContext) -> RouterResult<()> {
    let formatter = OutputFormatter::new(ctx.output_format);
    let router = ctx.router()?;
    let skip = &ctx.config.router.skip_services;

    let rows: Vec<ServiceRow> = router
        .registry()
        .snapshot()
        .values()
        .map(|iface| {
            let eligible = iface.eligible_commands();
            ServiceRow {
                name: iface.name.clone(),
                topic: iface.topic.clone(),
                commands: eligible.len(),
                reply_commands: eligible
                    .iter()
                    .filter(|(name, _)| iface.expects_reply(name))
                    .map(|(name, _)| name.to_string())
                    .collect(),
                skipped: skip.contains(&iface.name),
            }
        })
        .collect();

    if formatter.is_json() {
        formatter.json(&rows);
        return Ok(());
    }

    if rows.is_empty() {
        formatter.warning("No services known.");
        return Ok(());
    }

    let widths = [24, 24, 8, 32];
    formatter.table_header(&["SERVICE", "TOPIC", "COMMANDS", "REPLIES"], &widths);
    for row in &rows {
        let name = if row.skipped {
            format!("{} (skipped)", row.name)
        } else {
            row.name.clone()
        };
        let commands = row.commands.to_string();
        let replies = row.reply_commands.join(", ");
        formatter.table_row(
            &[
                name.as_str(),
                row.topic.as_deref().unwrap_or("-"),
                commands.as_str(),
                replies.as_str(),
            ],
            &widths,
        );
    }
    Ok(())
}
