//! Hands the hosted payment page to the desktop browser.

use std::io;
use std::process::Command;

use bioapp_storefront::checkout::UrlOpener;

/// How the CLI opens the payment page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    /// The platform's default browser.
    System,
    /// Log the URL for the user to open by hand.
    LogOnly,
}

impl UrlOpener for Browser {
    fn open_url(&self, url: &str) -> io::Result<()> {
        match self {
            Self::LogOnly => {
                tracing::info!(%url, "Open this URL to pay");
                Ok(())
            }
            Self::System => {
                let status = open_command(url).status()?;
                if status.success() {
                    Ok(())
                } else {
                    Err(io::Error::other(format!("browser launcher exited with {status}")))
                }
            }
        }
    }
}

#[cfg(target_os = "macos")]
fn open_command(url: &str) -> Command {
    let mut command = Command::new("open");
    command.arg(url);
    command
}

#[cfg(target_os = "windows")]
fn open_command(url: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", url]);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn open_command(url: &str) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    command
}
