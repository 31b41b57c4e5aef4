use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};

use devops_mirror::core::repos::{CloneOutcome, LinkOutcome};
use devops_mirror::core::services::Services;
use devops_mirror::core::store::{GitRepository, RepoStore};
use devops_mirror::core::terminal;

use super::{flag_value, has_flag, positionals};

async fn repo(services: &Services, repo_id: Option<&String>, usage: &str) -> Result<GitRepository> {
    let Some(repo_id) = repo_id else {
        bail!("usage: {}", usage);
    };
    services
        .store
        .get_repo(repo_id)
        .await?
        .ok_or_else(|| anyhow!("unknown repository '{}'", repo_id))
}

pub(crate) async fn list(services: &Services, args: &[String]) -> Result<()> {
    let repos = match args.get(2) {
        Some(project_id) => services.store.get_repos_by_project_id(project_id).await?,
        None => services.store.list_repos().await?,
    };
    if repos.is_empty() {
        terminal::print_info("No repositories known. Run 'devops-mirror check <project-id>'.");
        return Ok(());
    }

    services.repos.refresh_branches(&repos).await;
    for repo in repos {
        let state = match (repo.clone_path(), services.repos.current_branch(&repo.id)) {
            (Some(path), Some(branch)) => format!("{} @ {}", path.display(), branch),
            (Some(path), None) => path.display().to_string(),
            (None, _) => "not cloned".to_string(),
        };
        terminal::print_status(&repo.name, &format!("{} id={} {}", repo.url, repo.id, state));
    }
    Ok(())
}

pub(crate) async fn clone(services: &Services, args: &[String]) -> Result<()> {
    let repo = repo(
        services,
        args.get(2),
        "devops-mirror clone <repo-id> [--dir D] [--name N]",
    )
    .await?;
    let request = services.clone_request(
        repo,
        flag_value(args, 3, "--dir").map(PathBuf::from),
        flag_value(args, 3, "--name"),
    );

    terminal::print_step(&format!(
        "Cloning {} into {}",
        request.repo.name,
        request.destination().display()
    ));
    match services.repos.clone_repository(request) {
        CloneOutcome::Started(handle) => {
            let path = handle.wait().await?;
            terminal::print_success(&format!("Cloned to {}", path.display()));
        }
        CloneOutcome::AlreadyInProgress => {
            terminal::print_warn("A download of this repository is already running.");
        }
    }
    Ok(())
}

pub(crate) async fn link(services: &Services, args: &[String]) -> Result<()> {
    let repo = repo(services, args.get(2), "devops-mirror link <repo-id> <path>").await?;
    let Some(path) = args.get(3) else {
        bail!("usage: devops-mirror link <repo-id> <path>");
    };
    match services.repos.link_existing(&repo, &PathBuf::from(path)).await? {
        LinkOutcome::Linked(path) => {
            terminal::print_success(&format!("Linked {} to {}", repo.name, path.display()))
        }
        LinkOutcome::AlreadyInProgress => {
            terminal::print_warn("A download of this repository is already running.")
        }
    }
    Ok(())
}

pub(crate) async fn unlink(services: &Services, args: &[String]) -> Result<()> {
    let Some(repo_id) = args.get(2) else {
        bail!("usage: devops-mirror unlink <repo-id>");
    };
    if services.repos.unlink(repo_id).await? {
        terminal::print_success(&format!("Unlinked {}", repo_id));
    } else {
        terminal::print_warn(&format!("No repository with id {}", repo_id));
    }
    Ok(())
}

pub(crate) async fn branch(services: &Services, args: &[String]) -> Result<()> {
    let rest = positionals(args, 2, &[]);
    let Some((name, repo_ids)) = rest.split_first().filter(|(_, ids)| !ids.is_empty()) else {
        bail!("usage: devops-mirror branch <name> [--push] [--checkout] <repo-id>...");
    };

    let mut repos = Vec::with_capacity(repo_ids.len());
    for id in repo_ids {
        repos.push(repo(services, Some(id), "devops-mirror branch <name> <repo-id>...").await?);
    }

    let push = has_flag(args, 2, "--push");
    let checkout = has_flag(args, 2, "--checkout");
    if services.repos.create_branch(name, &repos, push, checkout).await? {
        terminal::print_success(&format!("Created {} in {} repositories", name, repos.len()));
    } else {
        terminal::print_warn(&format!("{} could not be created everywhere", name));
    }
    Ok(())
}
