//! Local cart store.
//!
//! Durable guest-cart persistence: a directory of well-known JSON documents,
//! the stand-in for browser local storage. Reads fail open — missing or
//! corrupt documents yield empty state, never an error — because a guest
//! cart is low-stakes and must not wedge the storefront. Writes go through
//! a temp file and rename so no partial document is ever observable.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

use crate::cart::{
    errors::CartError,
    models::{CartLine, CheckoutHandoff, SelectionSet},
};

const CART_DOCUMENT: &str = "cart.json";
const SELECTION_DOCUMENT: &str = "selection.json";
const HANDOFF_DOCUMENT: &str = "handoff.json";

/// File-backed persistence for the guest cart, the checkout selection, and
/// the checkout handoff snapshot.
///
/// Shared mutable state across every process using the same directory; the
/// only discipline is last-writer-wins at full-document granularity, which
/// is acceptable for a shopping cart and nothing stronger.
#[derive(Debug, Clone)]
pub struct LocalCartStore {
    dir: PathBuf,
}

impl LocalCartStore {
    /// Open a store rooted at `dir`. The directory is created on first
    /// write, not here.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The currently persisted guest lines, with duplicate
    /// `(product, variation)` pairs merged.
    ///
    /// Missing or unparseable state yields an empty list; corruption is
    /// logged and discarded, never surfaced.
    #[must_use]
    pub fn read_lines(&self) -> Vec<CartLine> {
        let lines: Vec<CartLine> = self.read_document(CART_DOCUMENT).unwrap_or_default();

        merge(lines)
    }

    /// Replace the persisted guest lines.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` if the document cannot be encoded or written.
    pub fn write_lines(&self, lines: &[CartLine]) -> Result<(), CartError> {
        self.write_document(CART_DOCUMENT, &lines)
    }

    /// The persisted checkout selection, or empty if none exists.
    #[must_use]
    pub fn read_selection(&self) -> SelectionSet {
        self.read_document(SELECTION_DOCUMENT).unwrap_or_default()
    }

    /// Replace the persisted checkout selection.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` if the document cannot be encoded or written.
    pub fn write_selection(&self, selection: &SelectionSet) -> Result<(), CartError> {
        self.write_document(SELECTION_DOCUMENT, selection)
    }

    /// The persisted checkout handoff, if one is outstanding.
    #[must_use]
    pub fn read_handoff(&self) -> Option<CheckoutHandoff> {
        self.read_document(HANDOFF_DOCUMENT)
    }

    /// Persist the checkout handoff snapshot.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` if the document cannot be encoded or written.
    pub fn write_handoff(&self, handoff: &CheckoutHandoff) -> Result<(), CartError> {
        self.write_document(HANDOFF_DOCUMENT, handoff)
    }

    /// Remove the persisted checkout handoff, if any.
    ///
    /// # Errors
    ///
    /// Returns a `CartError` if the document exists but cannot be removed.
    pub fn clear_handoff(&self) -> Result<(), CartError> {
        self.remove_document(HANDOFF_DOCUMENT)
    }

    /// Remove every persisted document (logout, or explicit cart clear).
    ///
    /// # Errors
    ///
    /// Returns a `CartError` if a document exists but cannot be removed.
    pub fn clear(&self) -> Result<(), CartError> {
        self.remove_document(CART_DOCUMENT)?;
        self.remove_document(SELECTION_DOCUMENT)?;
        self.remove_document(HANDOFF_DOCUMENT)?;

        Ok(())
    }

    fn path(&self, document: &str) -> PathBuf {
        self.dir.join(document)
    }

    fn read_document<T: DeserializeOwned>(&self, document: &str) -> Option<T> {
        let path = self.path(document);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(document, %error, "failed to read persisted cart state");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(document, %error, "discarding corrupt persisted cart state");
                None
            }
        }
    }

    fn write_document<T: Serialize>(&self, document: &str, value: &T) -> Result<(), CartError> {
        fs::create_dir_all(&self.dir)?;

        let bytes = serde_json::to_vec(value)?;
        let path = self.path(document);
        let staging = staging_path(&path);

        fs::write(&staging, bytes)?;
        fs::rename(&staging, &path)?;

        Ok(())
    }

    fn remove_document(&self, document: &str) -> Result<(), CartError> {
        match fs::remove_file(self.path(document)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");

    PathBuf::from(staging)
}

/// Fold a list possibly containing duplicate `(product, variation)` pairs
/// into a deduplicated one: duplicate pairs' quantities are summed and all
/// other fields take the last-seen value. First-seen order is preserved.
///
/// Applied at read time to repair drift (e.g. writes from multiple tabs).
/// Idempotent: merging an already-deduplicated list changes nothing.
#[must_use]
pub fn merge(lines: Vec<CartLine>) -> Vec<CartLine> {
    let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());

    for incoming in lines {
        if let Some(existing) = merged
            .iter_mut()
            .find(|candidate| candidate.pair() == incoming.pair())
        {
            let quantity = existing.quantity.saturating_add(incoming.quantity);
            *existing = incoming;
            existing.quantity = quantity;
        } else {
            merged.push(incoming);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;
    use tempfile::TempDir;
    use testresult::TestResult;

    use crate::{
        cart::models::LineDisplay,
        ids::{ProductId, VariationId},
    };

    use super::*;

    fn store() -> (TempDir, LocalCartStore) {
        let dir = TempDir::new().expect("temp dir should be creatable");
        let store = LocalCartStore::new(dir.path());

        (dir, store)
    }

    fn line(product: ProductId, variation: VariationId, quantity: u32) -> CartLine {
        CartLine {
            line_id: None,
            product_id: product,
            variation_id: variation,
            quantity,
            unit_price: 1200,
            display: LineDisplay {
                name: "Hydrating Serum 30ml".to_owned(),
                image_url: None,
                options: vec!["30ml".to_owned(), "50ml".to_owned()],
            },
            revision: 0,
            added_at: Timestamp::now(),
        }
    }

    #[test]
    fn read_without_persisted_state_is_empty() {
        let (_dir, store) = store();

        assert!(store.read_lines().is_empty());
        assert!(store.read_selection().is_empty());
        assert!(store.read_handoff().is_none());
    }

    #[test]
    fn write_then_read_round_trips_lines() -> TestResult {
        let (_dir, store) = store();
        let lines = vec![
            line(ProductId::new(), VariationId::new(), 2),
            line(ProductId::new(), VariationId::new(), 1),
        ];

        store.write_lines(&lines)?;

        assert_eq!(store.read_lines(), lines);

        Ok(())
    }

    #[test]
    fn corrupt_document_fails_open_to_empty() -> TestResult {
        let (dir, store) = store();

        std::fs::write(dir.path().join(CART_DOCUMENT), b"{not json")?;

        assert!(store.read_lines().is_empty());

        Ok(())
    }

    #[test]
    fn read_merges_duplicate_pairs_from_drift() -> TestResult {
        let (_dir, store) = store();
        let product = ProductId::new();
        let variation = VariationId::new();

        // Two tabs racing can persist the same pair twice.
        store.write_lines(&[
            line(product, variation, 2),
            line(ProductId::new(), VariationId::new(), 1),
            line(product, variation, 3),
        ])?;

        let lines = store.read_lines();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines.first().map(|l| l.quantity),
            Some(5),
            "duplicate pair quantities should be summed"
        );

        Ok(())
    }

    #[test]
    fn merge_is_idempotent() {
        let product = ProductId::new();
        let variation = VariationId::new();

        let once = merge(vec![
            line(product, variation, 1),
            line(product, variation, 4),
        ]);
        let twice = merge(once.clone());

        assert_eq!(once, twice);
    }

    #[test]
    fn merge_takes_last_seen_fields() {
        let product = ProductId::new();
        let variation = VariationId::new();

        let mut newer = line(product, variation, 3);
        newer.unit_price = 999;

        let merged = merge(vec![line(product, variation, 2), newer]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged.first().map(|l| l.quantity), Some(5));
        assert_eq!(
            merged.first().map(|l| l.unit_price),
            Some(999),
            "non-quantity fields should take the last-seen value"
        );
    }

    #[test]
    fn selection_round_trips() -> TestResult {
        let (_dir, store) = store();

        let mut selection = SelectionSet::new();
        selection.select(ProductId::new());

        store.write_selection(&selection)?;

        assert_eq!(store.read_selection(), selection);

        Ok(())
    }

    #[test]
    fn handoff_round_trips_and_clears() -> TestResult {
        let (_dir, store) = store();

        let handoff = CheckoutHandoff {
            lines: vec![line(ProductId::new(), VariationId::new(), 1)],
            created_at: Timestamp::now(),
        };

        store.write_handoff(&handoff)?;

        assert_eq!(store.read_handoff(), Some(handoff));

        store.clear_handoff()?;

        assert!(store.read_handoff().is_none());

        Ok(())
    }

    #[test]
    fn clear_removes_every_document() -> TestResult {
        let (_dir, store) = store();

        store.write_lines(&[line(ProductId::new(), VariationId::new(), 1)])?;

        let mut selection = SelectionSet::new();
        selection.select(ProductId::new());
        store.write_selection(&selection)?;

        store.clear()?;

        assert!(store.read_lines().is_empty());
        assert!(store.read_selection().is_empty());

        Ok(())
    }

    #[test]
    fn clear_on_empty_store_is_a_no_op() -> TestResult {
        let (_dir, store) = store();

        store.clear()?;

        Ok(())
    }
}
