//! Short random identifiers for tickets and correlated exchanges.
//!
//! Uniqueness is probabilistic: nanoid's 64-symbol alphabet gives 2^36
//! ticket IDs and 2^42 correlation IDs, plenty for the number of calls
//! in flight at any one time.

use nanoid::nanoid;

/// Length of a ticket ID.
pub const TICKET_ID_LEN: usize = 6;

/// Length of a correlation ID.
pub const CORRELATION_ID_LEN: usize = 7;

pub fn ticket_id() -> String {
    nanoid!(TICKET_ID_LEN)
}

pub fn correlation_id() -> String {
    nanoid!(CORRELATION_ID_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_have_fixed_lengths() {
        assert_eq!(ticket_id().len(), TICKET_ID_LEN);
        assert_eq!(correlation_id().len(), CORRELATION_ID_LEN);
    }

    #[test]
    fn ids_do_not_repeat_in_a_small_batch() {
        let ids: HashSet<String> = (0..1000).map(|_| correlation_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
