use std::sync::Mutex;
use std::sync::PoisonError;

use astra_core::auth::Navigator;
use url::Url;

/// Navigator for a terminal: the "current location" is whatever URL the
/// user handed us, and navigations open the system browser.
pub struct BrowserNavigator {
    app_url: Url,
    location: Mutex<Url>,
    open_browser: bool,
}

impl BrowserNavigator {
    pub fn new(app_url: Url, open_browser: bool) -> Self {
        Self {
            location: Mutex::new(app_url.clone()),
            app_url,
            open_browser,
        }
    }

    /// Starts at `location` instead of the app root, e.g. an OAuth redirect.
    pub fn at(app_url: Url, location: Url) -> Self {
        Self {
            app_url,
            location: Mutex::new(location),
            open_browser: false,
        }
    }

    /// App-relative targets resolve against the configured app URL.
    pub fn resolve(&self, target: &str) -> String {
        match Url::parse(target) {
            Ok(url) => url.to_string(),
            Err(_) => self
                .app_url
                .join(target)
                .map(|url| url.to_string())
                .unwrap_or_else(|_| target.to_string()),
        }
    }
}

impl Navigator for BrowserNavigator {
    fn location(&self) -> Url {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_history(&self, url: Url) {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = url;
    }

    fn assign(&self, target: &str) {
        let url = self.resolve(target);
        if !self.open_browser {
            println!("Continue at {url}");
            return;
        }
        println!("Opening {url}");
        if webbrowser::open(&url).is_err() {
            println!("(Browser launch failed; please open the URL above manually.)");
        }
    }
}
