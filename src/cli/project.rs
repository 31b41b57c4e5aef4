use anyhow::{Result, bail};

use devops_mirror::core::remote::{Project, ServiceMode};
use devops_mirror::core::services::Services;
use devops_mirror::core::store::ProjectStore;
use devops_mirror::core::terminal;

use super::{flag_value, has_flag, positionals};

pub(crate) async fn run(services: &Services, args: &[String]) -> Result<()> {
    match args.get(2).map(String::as_str) {
        Some("add") => add(services, args).await,
        Some("list") => list(services).await,
        Some("remove") => {
            let Some(project_id) = args.get(3) else {
                bail!("usage: devops-mirror project remove <project-id>");
            };
            if services.remove_project(project_id).await? {
                terminal::print_success(&format!("Removed project {}", project_id));
            } else {
                terminal::print_warn(&format!("No project with id {}", project_id));
            }
            Ok(())
        }
        _ => bail!("usage: devops-mirror project add|list|remove"),
    }
}

pub(crate) fn parse_project(args: &[String], start: usize) -> Result<Project> {
    let rest = positionals(args, start, &["--token", "--id"]);
    let [name, base_url] = rest.as_slice() else {
        bail!("usage: devops-mirror project add <name> <url> [--server] [--token T] [--id ID]");
    };
    let mode = if has_flag(args, start, "--server") {
        ServiceMode::Server
    } else {
        ServiceMode::Service
    };
    Ok(Project {
        id: flag_value(args, start, "--id").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: name.clone(),
        base_url: base_url.clone(),
        mode,
        token: flag_value(args, start, "--token"),
    })
}

async fn add(services: &Services, args: &[String]) -> Result<()> {
    let project = parse_project(args, 3)?;
    url::Url::parse(&project.base_url)?;
    services.store.upsert_project(&project).await?;
    terminal::print_success(&format!("Registered {} ({})", project.name, project.id));
    Ok(())
}

async fn list(services: &Services) -> Result<()> {
    let projects = services.store.list_projects().await?;
    if projects.is_empty() {
        terminal::print_info("No projects registered.");
        return Ok(());
    }
    for project in projects {
        terminal::print_status(
            &project.name,
            &format!(
                "{} [{}] id={}{}",
                project.base_url,
                project.mode.as_str(),
                project.id,
                if project.credential().is_some() { " (token)" } else { "" }
            ),
        );
    }
    Ok(())
}
