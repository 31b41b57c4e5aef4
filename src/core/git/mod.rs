//! Blocking git2 operations. Callers run these on the blocking pool.

use std::cell::{Cell, RefCell};
use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository};
use tracing::debug;

use crate::core::error::SyncError;
use crate::core::remote::PAT_USERNAME;

/// Credentials are offered once per transfer. A second request from libgit2
/// means the server rejected them, so the transfer is failed instead of looping.
fn remote_callbacks(token: Option<&str>) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    let attempted = Cell::new(false);
    callbacks.credentials(move |url, _username_from_url, allowed| {
        if attempted.replace(true) {
            return Err(git2::Error::from_str(&format!(
                "authentication rejected for {}",
                url
            )));
        }
        match token {
            Some(token) if allowed.is_user_pass_plaintext() => {
                Cred::userpass_plaintext(PAT_USERNAME, token)
            }
            _ => Cred::default(),
        }
    });
    callbacks
}

fn open_working_copy(path: &Path) -> Result<Repository, SyncError> {
    let repo = match Repository::open(path) {
        Ok(repo) => repo,
        Err(e) if e.code() == ErrorCode::NotFound => {
            return Err(SyncError::NotARepository(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if repo.is_bare() {
        return Err(SyncError::NotARepository(path.to_path_buf()));
    }
    Ok(repo)
}

pub fn clone_repository(url: &str, dest: &Path, token: Option<&str>) -> Result<(), SyncError> {
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(remote_callbacks(token));

    debug!("Cloning {} into {}", url, dest.display());
    RepoBuilder::new().fetch_options(fetch).clone(url, dest)?;
    Ok(())
}

/// Names of the remotes configured in the working copy at `path`.
pub fn remote_names(path: &Path) -> Result<Vec<String>, SyncError> {
    let repo = open_working_copy(path)?;
    let remotes = repo.remotes()?;
    Ok(remotes.iter().flatten().map(str::to_string).collect())
}

/// Short name of the checked-out branch, `None` for an unborn or detached HEAD.
pub fn current_branch(path: &Path) -> Result<Option<String>, SyncError> {
    let repo = open_working_copy(path)?;
    if repo.head_detached()? {
        return Ok(None);
    }
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(head.shorthand().map(str::to_string))
}

/// Creates `name` at HEAD and, when asked, switches the working copy to it.
pub fn create_branch(path: &Path, name: &str, checkout: bool) -> Result<(), SyncError> {
    let repo = open_working_copy(path)?;
    let commit = repo.head()?.peel_to_commit()?;
    repo.branch(name, &commit, false)?;

    if checkout {
        let mut opts = CheckoutBuilder::new();
        opts.safe();
        repo.checkout_tree(commit.as_object(), Some(&mut opts))?;
        repo.set_head(&format!("refs/heads/{}", name))?;
    }
    Ok(())
}

pub fn push_branch(path: &Path, name: &str, token: Option<&str>) -> Result<(), SyncError> {
    let repo = open_working_copy(path)?;
    let mut remote = repo.find_remote("origin")?;
    let refspec = format!("refs/heads/{0}:refs/heads/{0}", name);

    let rejected: RefCell<Option<String>> = RefCell::new(None);
    {
        let mut callbacks = remote_callbacks(token);
        callbacks.push_update_reference(|_ref_name, status| {
            if let Some(msg) = status {
                *rejected.borrow_mut() = Some(msg.to_string());
            }
            Ok(())
        });

        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(callbacks);
        remote.push(&[refspec.as_str()], Some(&mut push_options))?;
    }

    if let Some(msg) = rejected.into_inner() {
        return Err(git2::Error::from_str(&format!("push of {} rejected: {}", name, msg)).into());
    }
    Ok(())
}
