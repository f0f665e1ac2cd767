use url::Url;

/// Where the session layer reads the current location from and sends the
/// user next.
pub trait Navigator: Send + Sync {
    fn location(&self) -> Url;

    /// Rewrites the current history entry without navigating.
    fn replace_history(&self, url: Url);

    /// Full navigation. `target` may be absolute or app-relative.
    fn assign(&self, target: &str);
}
