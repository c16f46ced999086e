//! Route table for reply messages outside the core stores.

use tracing::debug;

use crate::core::eventing::kevery::Attachments;
use crate::core::serdering::Serder;
use crate::errors::Result;

/// Handler for a registered reply route base.
pub type ReplyHandler = Box<dyn FnMut(&Serder, &Attachments) -> Result<()> + Send>;

/// Dispatches reply messages by route prefix to registered handlers.
/// The longest matching base wins.
#[derive(Default)]
pub struct Router {
    routes: Vec<(String, ReplyHandler)>,
}

impl Router {
    pub fn new() -> Self {
        Router { routes: Vec::new() }
    }

    pub fn add_route(&mut self, base: &str, handler: ReplyHandler) {
        self.routes.push((base.to_string(), handler));
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn has_route(&self, base: &str) -> bool {
        self.routes.iter().any(|(b, _)| b == base)
    }

    /// Dispatches to the first matching handler. Returns false when no
    /// route matches.
    pub fn dispatch(&mut self, serder: &Serder, atc: &Attachments) -> Result<bool> {
        let route = serder.route().unwrap_or_default().to_string();
        for (base, handler) in self.routes.iter_mut() {
            if route.starts_with(base.as_str()) {
                handler(serder, atc)?;
                return Ok(true);
            }
        }
        debug!(%route, "no handler for reply route");
        Ok(false)
    }
}
