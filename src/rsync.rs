//! Fetching a remote repository copy over rsync. A pure shell-out: the module
//! and CVSROOT are probed with a listing first so a missing module fails fast
//! as not-found instead of as an rsync error.

use std::path::Path;

use tokio::process::Command;

use crate::Error;

pub(crate) async fn fetch_cvs_repo_with_rsync(
    host: &str,
    cvsroot: &str,
    module: &str,
    dest: &Path,
) -> Result<(), Error> {
    // The URL must end with a slash for the CVSROOT entry to be listed.
    let url = format!("rsync://{}{}/", host, cvsroot);

    let listing = Command::new("rsync").arg(&url).output().await?;
    if !listing.status.success() {
        return Err(Error::NotFound(format!(
            "rsync listing of {} failed: {}",
            url,
            String::from_utf8_lossy(&listing.stderr).trim_end()
        )));
    }

    let mut have_cvsroot = false;
    let mut have_module = false;
    for line in String::from_utf8_lossy(&listing.stdout).lines() {
        log::debug!("rsync server: {}", line);
        if line.ends_with(" CVSROOT") {
            have_cvsroot = true;
        } else if line.ends_with(&format!(" {}", module)) {
            have_module = true;
        }
        if have_cvsroot && have_module {
            break;
        }
    }

    if !have_module {
        return Err(Error::NotFound(format!(
            "CVS module {} not found at {}",
            module, url
        )));
    }
    if !have_cvsroot {
        return Err(Error::NotFound(format!(
            "no CVSROOT directory found at {}",
            url
        )));
    }

    let fetch = Command::new("rsync")
        .arg("-a")
        .arg(&url)
        .arg(dest)
        .output()
        .await?;
    if !fetch.status.success() {
        return Err(Error::Protocol(format!(
            "rsync fetch of {} failed: {}",
            url,
            String::from_utf8_lossy(&fetch.stderr).trim_end()
        )));
    }

    Ok(())
}
