//! Simple Paged Results control state (RFC 2696).
//!
//! Every paged search owns its own [`PagingState`]; the cookie is never stored
//! on the connection, so two searches (or two runs) cannot consume each
//! other's cursor.

use ldap3::controls::{Control, PagedResults};
use ldap3::LdapResult;

/// OID of the paged-results control as advertised in `supportedControl`.
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// Page size used when neither the request nor the connection sets one.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Cursor of one paged search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingState {
    page_size: u32,
    cookie: Vec<u8>,
    pages_fetched: u32,
    exhausted: bool,
}

impl PagingState {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            cookie: Vec::new(),
            pages_fetched: 0,
            exhausted: false,
        }
    }

    /// Control to attach to the next search request.
    pub fn control(&self) -> PagedResults {
        PagedResults {
            size: i32::try_from(self.page_size).unwrap_or(i32::MAX),
            cookie: self.cookie.clone(),
        }
    }

    /// Record the cookie returned with a page. An empty cookie ends the search.
    pub fn advance(&mut self, next_cookie: Vec<u8>) {
        self.pages_fetched += 1;
        self.exhausted = next_cookie.is_empty();
        self.cookie = next_cookie;
    }

    /// Rewind so the same search can be issued again from the first page.
    pub fn reset(&mut self) {
        self.cookie.clear();
        self.pages_fetched = 0;
        self.exhausted = false;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Extract the server's cookie from a search result. Returns an empty
    /// cookie when the control is missing, which ends the paging loop.
    pub fn cookie_from_result(result: &LdapResult) -> Vec<u8> {
        result
            .ctrls
            .iter()
            .find_map(|Control(_, raw)| {
                if raw.ctype == PAGED_RESULTS_OID && raw.val.is_some() {
                    Some(raw.parse::<PagedResults>().cookie)
                } else {
                    None
                }
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_sends_empty_cookie() {
        let state = PagingState::new(500);
        let control = state.control();
        assert_eq!(control.size, 500);
        assert!(control.cookie.is_empty());
        assert!(!state.is_exhausted());
    }

    #[test]
    fn test_advance_and_exhaust() {
        let mut state = PagingState::new(2);
        state.advance(vec![0xDE, 0xAD]);
        assert_eq!(state.control().cookie, vec![0xDE, 0xAD]);
        assert!(!state.is_exhausted());

        state.advance(Vec::new());
        assert!(state.is_exhausted());
        assert_eq!(state.pages_fetched(), 2);
    }

    #[test]
    fn test_reset_restarts_from_first_page() {
        let mut state = PagingState::new(10);
        state.advance(vec![1]);
        state.advance(Vec::new());
        state.reset();
        assert!(!state.is_exhausted());
        assert_eq!(state.pages_fetched(), 0);
        assert!(state.control().cookie.is_empty());
    }

    #[test]
    fn test_zero_page_size_is_clamped() {
        assert_eq!(PagingState::new(0).page_size(), 1);
    }

    #[test]
    fn test_missing_control_yields_empty_cookie() {
        let result = LdapResult {
            rc: 0,
            matched: String::new(),
            text: String::new(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        };
        assert!(PagingState::cookie_from_result(&result).is_empty());
    }
}
