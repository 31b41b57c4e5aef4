mod project;
mod repos;
mod watch;

use anyhow::Result;
use console::style;

use devops_mirror::core::config::SyncConfig;
use devops_mirror::core::services::Services;
use devops_mirror::core::terminal::{self, GuideSection, print_error};
use devops_mirror::logging;
use devops_mirror::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Monitoring")
        .command("watch", "Run the agent monitor and project sync until Ctrl-C")
        .command("check <project-id>", "Poll one project right now")
        .command(
            "state <project-id> <work-item> <state>",
            "Move a work item to a new state",
        )
        .print();

    GuideSection::new("Projects")
        .command(
            "project add <name> <url> [--server] [--token T] [--id ID]",
            "Register a project",
        )
        .command("project list", "List registered projects")
        .command("project remove <project-id>", "Forget a project")
        .print();

    GuideSection::new("Repositories")
        .command("repos <project-id>", "List known repositories")
        .command("clone <repo-id> [--dir D] [--name N]", "Clone a repository")
        .command("link <repo-id> <path>", "Link an existing working copy")
        .command("unlink <repo-id>", "Forget a repository's local copy")
        .command(
            "branch <name> [--push] [--checkout] <repo-id>...",
            "Create a branch in cloned repositories",
        )
        .print();

    println!(
        "\n {} {} <command> [arguments]\n",
        style("Usage:").bold(),
        style("devops-mirror").green()
    );
}

/// Value following `flag`, if present.
pub(crate) fn flag_value(args: &[String], start: usize, flag: &str) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        if args[i] == flag {
            return args.get(i + 1).cloned();
        }
        i += 1;
    }
    None
}

pub(crate) fn has_flag(args: &[String], start: usize, flag: &str) -> bool {
    args.iter().skip(start).any(|a| a == flag)
}

/// Arguments that are neither flags nor the values of `value_flags`.
pub(crate) fn positionals(args: &[String], start: usize, value_flags: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = start;
    while i < args.len() {
        let arg = args[i].as_str();
        if value_flags.contains(&arg) {
            i += 2;
        } else if arg.starts_with("--") {
            i += 1;
        } else {
            out.push(args[i].clone());
            i += 1;
        }
    }
    out
}

async fn services(log_level: Option<&str>) -> Result<Services> {
    let data_dir = NativePlatform::data_dir();
    let config = SyncConfig::load(&data_dir).await?;
    logging::init(log_level.unwrap_or(&config.logging.level), false)?;
    Services::build(&data_dir, config).await
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "watch" => {
            let services = services(None).await?;
            watch::run(&services).await
        }
        "check" => {
            let services = services(Some("warn")).await?;
            watch::check(&services, &args).await
        }
        "state" => {
            let services = services(Some("warn")).await?;
            watch::set_state(&services, &args).await
        }
        "project" => {
            let services = services(Some("warn")).await?;
            project::run(&services, &args).await
        }
        "repos" => {
            let services = services(Some("warn")).await?;
            repos::list(&services, &args).await
        }
        "clone" => {
            let services = services(Some("warn")).await?;
            repos::clone(&services, &args).await
        }
        "link" => {
            let services = services(Some("warn")).await?;
            repos::link(&services, &args).await
        }
        "unlink" => {
            let services = services(Some("warn")).await?;
            repos::unlink(&services, &args).await
        }
        "branch" => {
            let services = services(Some("warn")).await?;
            repos::branch(&services, &args).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'.", other));
            print_help();
            Ok(())
        }
    }
}
