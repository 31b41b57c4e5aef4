use anyhow::{Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use devops_mirror::core::monitor::{AGENT_ONLINE, WORK_ITEM_UPDATED};
use devops_mirror::core::services::Services;
use devops_mirror::core::terminal;

pub(crate) async fn run(services: &Services) -> Result<()> {
    let mut notifications = services.notifications.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(n) => terminal::print_notification(&n.title, &n.message),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} notifications", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lifecycle = services.lifecycle();
    lifecycle.start().await?;
    terminal::print_info("Monitoring started. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    printer.abort();
    terminal::print_goodbye();
    Ok(())
}

pub(crate) async fn check(services: &Services, args: &[String]) -> Result<()> {
    let Some(project_id) = args.get(2) else {
        bail!("usage: devops-mirror check <project-id>");
    };
    let (online, report) = services.force_check(project_id).await?;

    terminal::print_status(
        "Repositories",
        &format!("{} seen, {} new", report.repositories_seen, report.repositories_added),
    );
    terminal::print_status("Work items", &report.work_items.to_string());
    for change in &report.state_changes {
        terminal::print_notification(
            WORK_ITEM_UPDATED,
            &format!("#{} {}: {} -> {}", change.id, change.title, change.from, change.to),
        );
    }
    let agents = services.agents.reconciler().cached(Some(project_id));
    let up = agents.iter().filter(|a| a.is_online()).count();
    terminal::print_status("Agents", &format!("{} of {} online", up, agents.len()));
    for agent in online {
        terminal::print_notification(AGENT_ONLINE, &agent.name);
    }
    Ok(())
}

pub(crate) async fn set_state(services: &Services, args: &[String]) -> Result<()> {
    let (Some(project_id), Some(id), Some(state)) = (args.get(2), args.get(3), args.get(4)) else {
        bail!("usage: devops-mirror state <project-id> <work-item> <state>");
    };
    let id: i64 = id.parse()?;
    if services.update_work_item_state(project_id, id, state).await? {
        terminal::print_success(&format!("Work item {} is now {}", id, state));
    } else {
        terminal::print_warn(&format!("The server refused to move work item {} to {}", id, state));
    }
    Ok(())
}
