//! Per-account summaries pushed on the `account_snapshots` broadcast channel.
//!
//! Batches are folded into the [`SnapshotBook`] by account id. Accounts missing from a
//! batch are left untouched - they persist until the session ends.

use crate::de::{de_lenient_decimal, de_lenient_f64, de_string_or_number};
use derive_more::{Display, From};
use fnv::FnvHashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Trading account identifier.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Deserialize, Serialize,
)]
pub struct AccountId(pub SmolStr);

impl AccountId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }
}

/// Account metrics as computed server side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccountMetrics {
    #[serde(default, deserialize_with = "de_lenient_decimal")]
    pub balance: Decimal,
    #[serde(default, deserialize_with = "de_lenient_decimal")]
    pub equity: Decimal,
    #[serde(default, deserialize_with = "de_lenient_decimal")]
    pub margin: Decimal,
    #[serde(default, deserialize_with = "de_lenient_decimal")]
    pub free_margin: Decimal,
    #[serde(default, deserialize_with = "de_lenient_decimal")]
    pub margin_level: Decimal,
    #[serde(default, deserialize_with = "de_lenient_decimal")]
    pub pl: Decimal,
}

/// One entry of an inbound `account_snapshots` batch, unsanitised.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountSnapshotUpdate {
    #[serde(default, deserialize_with = "de_string_or_number")]
    pub account_id: String,
    #[serde(default = "nan", deserialize_with = "de_lenient_f64")]
    pub pl: f64,
    #[serde(default = "nan", deserialize_with = "de_lenient_f64")]
    pub open_count: f64,
    #[serde(default)]
    pub metrics: Option<AccountMetrics>,
}

fn nan() -> f64 {
    f64::NAN
}

/// Sanitised per-account summary.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountSnapshot {
    pub profit_loss: f64,
    pub open_position_count: u32,
    pub metrics: Option<AccountMetrics>,
}

impl From<&AccountSnapshotUpdate> for AccountSnapshot {
    fn from(update: &AccountSnapshotUpdate) -> Self {
        Self {
            profit_loss: if update.pl.is_finite() { update.pl } else { 0.0 },
            open_position_count: sanitize_count(update.open_count),
            metrics: update.metrics.clone(),
        }
    }
}

/// Truncate towards zero and clamp to `0..=u32::MAX`. Non-finite counts are `0`.
fn sanitize_count(count: f64) -> u32 {
    if count.is_finite() {
        count.trunc().clamp(0.0, u32::MAX as f64) as u32
    } else {
        0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotBook {
    accounts: FnvHashMap<AccountId, AccountSnapshot>,
}

impl SnapshotBook {
    /// Fold a batch into the book, returning how many entries were written.
    ///
    /// Entries with an empty id are skipped.
    pub fn merge(&mut self, batch: &[AccountSnapshotUpdate]) -> usize {
        let mut written = 0;
        for update in batch {
            let account_id = update.account_id.trim();
            if account_id.is_empty() {
                continue;
            }
            self.accounts
                .insert(AccountId::new(account_id), AccountSnapshot::from(update));
            written += 1;
        }
        written
    }

    pub fn get(&self, account: &AccountId) -> Option<&AccountSnapshot> {
        self.accounts.get(account)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &AccountSnapshot)> {
        self.accounts.iter()
    }
}
