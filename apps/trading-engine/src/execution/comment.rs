//! Compact audit comment attached to every order.
//!
//! Format: `O|{version}|{hmm_state}|{action_idx}|{intensity}|{balance}|{dd}|{vpnl}`
//! with balance as an integer, drawdown at one decimal and virtual PnL
//! at two. The broker caps order labels at 100 characters; by
//! construction the comment stays well under, and is truncated on the
//! right if it ever does not.

/// Schema version stamped into every comment.
pub const COMMENT_VERSION: &str = "2.0";

/// Broker-side label length cap.
pub const MAX_COMMENT_LEN: usize = 100;

/// Parsed (or to-be-built) audit comment.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditComment {
    pub version: String,
    pub hmm_state: usize,
    pub action_index: usize,
    pub intensity: u8,
    pub balance: i64,
    pub drawdown_pct: f64,
    pub virtual_pnl: f64,
}

impl AuditComment {
    /// Build the wire string.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(
        hmm_state: usize,
        action_index: usize,
        intensity: u8,
        balance: f64,
        drawdown_pct: f64,
        virtual_pnl: f64,
    ) -> String {
        let mut comment = format!(
            "O|{COMMENT_VERSION}|{hmm_state}|{action_index}|{intensity}|{}|{drawdown_pct:.1}|{virtual_pnl:.2}",
            balance as i64
        );
        if comment.len() > MAX_COMMENT_LEN {
            comment.truncate(MAX_COMMENT_LEN);
        }
        comment
    }

    /// Reverse-parse a comment. Returns `None` for anything that does
    /// not carry the full schema.
    #[must_use]
    pub fn parse(comment: &str) -> Option<Self> {
        let mut parts = comment.split('|');
        if parts.next()? != "O" {
            return None;
        }
        let version = parts.next()?.to_string();
        let hmm_state = parts.next()?.parse().ok()?;
        let action_index = parts.next()?.parse().ok()?;
        let intensity = parts.next()?.parse().ok()?;
        let balance = parts.next()?.parse().ok()?;
        let drawdown_pct = parts.next()?.parse().ok()?;
        let virtual_pnl = parts.next()?.parse().ok()?;
        Some(Self {
            version,
            hmm_state,
            action_index,
            intensity,
            balance,
            drawdown_pct,
            virtual_pnl,
        })
    }
}
