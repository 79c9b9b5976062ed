//! Browser launching for the authorization code flow

use console::style;
use std::io;

/// Opens the authorization URL for the user
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser at `url`
    fn open(&self, url: &str) -> io::Result<()>;

    /// Show the URL so the user can open it manually
    fn show_url(&self, url: &str) {
        eprintln!(
            "{}\n\n  {}\n",
            style("Open the following URL in your browser to log in:").dim(),
            url
        );
    }
}

/// Launches the system default browser
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        webbrowser::open(url)
    }
}
