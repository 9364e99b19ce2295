//! Cart models.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::ids::{LineId, ProductId, VariationId};

/// List and sale price of one purchasable variation, in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationPricing {
    /// List price.
    pub price: u64,

    /// Discounted price, if a sale is set.
    pub sale_price: Option<u64>,
}

impl VariationPricing {
    /// The price charged for this variation: the sale price when one is set
    /// and actually lower than list, otherwise the list price.
    #[must_use]
    pub fn effective(&self) -> u64 {
        match self.sale_price {
            Some(sale) if sale > 0 && sale < self.price => sale,
            _ => self.price,
        }
    }
}

/// Rendering details carried on a line. Not authoritative for pricing or
/// identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDisplay {
    /// Product name.
    pub name: String,

    /// Product image URL.
    pub image_url: Option<String>,

    /// Labels of the variation options the product offers.
    pub options: Vec<String>,
}

/// One product variation held in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    /// Server-assigned identifier; `None` for guest lines.
    pub line_id: Option<LineId>,

    /// The product.
    pub product_id: ProductId,

    /// The purchased variation of the product.
    pub variation_id: VariationId,

    /// Units of the variation; always at least 1.
    pub quantity: u32,

    /// Effective unit price in minor units, snapshotted at add/update time.
    /// Later price changes elsewhere do not alter the line until it is
    /// explicitly updated.
    pub unit_price: u64,

    /// Rendering details.
    pub display: LineDisplay,

    /// Per-line monotonic sequence; bumped on every successful mutation so
    /// stale backend responses can be discarded.
    #[serde(default)]
    pub revision: u64,

    /// When the line was first added.
    pub added_at: Timestamp,
}

impl CartLine {
    /// The `(product, variation)` pair that identifies this line within a
    /// cart.
    #[must_use]
    pub fn pair(&self) -> (ProductId, VariationId) {
        (self.product_id, self.variation_id)
    }

    /// Line total: unit price times quantity.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.unit_price * u64::from(self.quantity)
    }
}

/// Request data for adding a line to the cart.
#[derive(Debug, Clone)]
pub struct NewLine {
    /// The product.
    pub product_id: ProductId,

    /// The chosen variation.
    pub variation_id: VariationId,

    /// Requested units; values below 1 are clamped to 1.
    pub quantity: u32,

    /// Pricing of the chosen variation, used to derive the unit price.
    pub pricing: VariationPricing,

    /// Rendering details.
    pub display: LineDisplay,
}

/// A variation switch on an existing line.
#[derive(Debug, Clone)]
pub struct VariationChange {
    /// The new variation.
    pub variation_id: VariationId,

    /// Pricing of the new variation.
    pub pricing: VariationPricing,
}

/// Partial update of an existing line. Unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct LineUpdate {
    /// Requested quantity; values at or below 0 are clamped to 1, never
    /// treated as a removal.
    pub quantity: Option<i64>,

    /// Switch the line to another variation, preserving its identity and
    /// position.
    pub variation: Option<VariationChange>,
}

/// The full set of lines for one session.
///
/// Invariant: the `(product, variation)` pair is unique within a cart.
#[derive(Debug, Clone, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Build a cart from lines assumed to already satisfy pair uniqueness.
    #[must_use]
    pub fn from_lines(lines: Vec<CartLine>) -> Self {
        Self { lines }
    }

    /// Iterate over the lines in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &CartLine> {
        self.lines.iter()
    }

    /// All lines, in insertion order.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Consume the cart, yielding its lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<CartLine> {
        self.lines
    }

    /// Number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the cart holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Find the line for a `(product, variation)` pair.
    #[must_use]
    pub fn find(&self, product: ProductId, variation: VariationId) -> Option<&CartLine> {
        self.lines
            .iter()
            .find(|line| line.pair() == (product, variation))
    }

    /// Mutable access to the line for a `(product, variation)` pair.
    pub fn find_mut(
        &mut self,
        product: ProductId,
        variation: VariationId,
    ) -> Option<&mut CartLine> {
        self.lines
            .iter_mut()
            .find(|line| line.pair() == (product, variation))
    }

    /// Upsert a line by its pair: replace the existing line in place, or
    /// append. Keeps insertion order stable across updates.
    pub fn apply(&mut self, line: CartLine) {
        let pair = line.pair();

        if let Some(existing) = self
            .lines
            .iter_mut()
            .find(|candidate| candidate.pair() == pair)
        {
            *existing = line;
        } else {
            self.lines.push(line);
        }
    }

    /// Remove the line for a pair, returning it if present.
    pub fn remove(&mut self, product: ProductId, variation: VariationId) -> Option<CartLine> {
        let index = self
            .lines
            .iter()
            .position(|line| line.pair() == (product, variation))?;

        Some(self.lines.remove(index))
    }

    /// Whether any line references the given product.
    #[must_use]
    pub fn contains_product(&self, product: ProductId) -> bool {
        self.lines.iter().any(|line| line.product_id == product)
    }

    /// Sum of line totals, in minor units.
    #[must_use]
    pub fn subtotal(&self) -> u64 {
        self.lines.iter().map(CartLine::total).sum()
    }
}

/// Product ids marked for checkout, persisted beside the cart so a reload
/// does not lose the user's selections.
///
/// Invariant: every id references a line currently present in the cart;
/// stale ids are pruned whenever the cart changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSet {
    products: Vec<ProductId>,
}

impl SelectionSet {
    /// Create an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a product for checkout. Idempotent.
    pub fn select(&mut self, product: ProductId) {
        if !self.products.contains(&product) {
            self.products.push(product);
        }
    }

    /// Unmark a product. Returns whether it was selected.
    pub fn deselect(&mut self, product: ProductId) -> bool {
        let before = self.products.len();
        self.products.retain(|selected| *selected != product);

        self.products.len() != before
    }

    /// Whether the product is marked for checkout.
    #[must_use]
    pub fn contains(&self, product: ProductId) -> bool {
        self.products.contains(&product)
    }

    /// Drop ids that no longer reference a line in the cart. Returns whether
    /// anything was pruned.
    pub fn prune(&mut self, cart: &Cart) -> bool {
        let before = self.products.len();
        self.products
            .retain(|product| cart.contains_product(*product));

        self.products.len() != before
    }

    /// Iterate over the selected product ids.
    pub fn iter(&self) -> impl Iterator<Item = ProductId> + '_ {
        self.products.iter().copied()
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Immutable snapshot of the lines handed off to checkout.
///
/// Created by `begin_checkout`; independent of later cart mutations, and
/// persisted so a navigation to the checkout view can recover it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutHandoff {
    /// Deep-copied lines being checked out.
    pub lines: Vec<CartLine>,

    /// When the handoff was taken.
    pub created_at: Timestamp,
}

impl CheckoutHandoff {
    /// Sum of line totals, in minor units.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.lines.iter().map(CartLine::total).sum()
    }
}

/// Result of a checkout handoff.
#[derive(Debug)]
pub struct CheckoutOutcome {
    /// The handed-off snapshot.
    pub handoff: CheckoutHandoff,

    /// Selected lines that could not be removed from the backing store and
    /// therefore remain in the cart.
    pub unmoved: Vec<CartLine>,
}

/// Result of merging a guest cart into the server cart at login.
#[derive(Debug)]
pub struct LoginReport {
    /// Guest lines pushed into the server cart.
    pub merged: usize,

    /// Guest lines that could not be pushed; they stay in local persistence.
    pub failed: Vec<CartLine>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product: ProductId, variation: VariationId, quantity: u32, price: u64) -> CartLine {
        CartLine {
            line_id: None,
            product_id: product,
            variation_id: variation,
            quantity,
            unit_price: price,
            display: LineDisplay::default(),
            revision: 0,
            added_at: Timestamp::now(),
        }
    }

    #[test]
    fn effective_price_prefers_lower_sale_price() {
        let pricing = VariationPricing {
            price: 1800,
            sale_price: Some(1450),
        };

        assert_eq!(pricing.effective(), 1450);
    }

    #[test]
    fn effective_price_ignores_zero_sale_price() {
        let pricing = VariationPricing {
            price: 1800,
            sale_price: Some(0),
        };

        assert_eq!(pricing.effective(), 1800);
    }

    #[test]
    fn effective_price_ignores_sale_above_list() {
        let pricing = VariationPricing {
            price: 1800,
            sale_price: Some(2000),
        };

        assert_eq!(pricing.effective(), 1800);
    }

    #[test]
    fn effective_price_without_sale_uses_list() {
        let pricing = VariationPricing {
            price: 950,
            sale_price: None,
        };

        assert_eq!(pricing.effective(), 950);
    }

    #[test]
    fn apply_replaces_existing_pair_in_place() {
        let product = ProductId::new();
        let variation = VariationId::new();

        let mut cart = Cart::from_lines(vec![
            line(product, variation, 1, 100),
            line(ProductId::new(), VariationId::new(), 1, 200),
        ]);

        cart.apply(line(product, variation, 4, 100));

        assert_eq!(cart.len(), 2);
        assert_eq!(
            cart.find(product, variation).map(|l| l.quantity),
            Some(4),
            "existing line should be replaced, not duplicated"
        );
        assert_eq!(
            cart.lines().first().map(CartLine::pair),
            Some((product, variation)),
            "line position should be stable across updates"
        );
    }

    #[test]
    fn remove_returns_the_removed_line() {
        let product = ProductId::new();
        let variation = VariationId::new();

        let mut cart = Cart::from_lines(vec![line(product, variation, 2, 300)]);

        let removed = cart.remove(product, variation);

        assert_eq!(removed.map(|l| l.quantity), Some(2));
        assert!(cart.is_empty());
        assert!(cart.remove(product, variation).is_none());
    }

    #[test]
    fn subtotal_sums_line_totals() {
        let cart = Cart::from_lines(vec![
            line(ProductId::new(), VariationId::new(), 2, 500),
            line(ProductId::new(), VariationId::new(), 1, 250),
        ]);

        assert_eq!(cart.subtotal(), 1250);
    }

    #[test]
    fn selection_prunes_ids_without_lines() {
        let kept = ProductId::new();
        let removed = ProductId::new();

        let cart = Cart::from_lines(vec![line(kept, VariationId::new(), 1, 100)]);

        let mut selection = SelectionSet::new();
        selection.select(kept);
        selection.select(removed);

        assert!(selection.prune(&cart), "stale id should be pruned");
        assert!(selection.contains(kept));
        assert!(!selection.contains(removed));
        assert!(!selection.prune(&cart), "second prune is a no-op");
    }

    #[test]
    fn selection_select_is_idempotent() {
        let product = ProductId::new();
        let mut selection = SelectionSet::new();

        selection.select(product);
        selection.select(product);

        assert_eq!(selection.iter().count(), 1);
        assert!(selection.deselect(product));
        assert!(!selection.deselect(product));
        assert!(selection.is_empty());
    }

    #[test]
    fn handoff_total_sums_copied_lines() {
        let handoff = CheckoutHandoff {
            lines: vec![
                line(ProductId::new(), VariationId::new(), 3, 400),
                line(ProductId::new(), VariationId::new(), 1, 150),
            ],
            created_at: Timestamp::now(),
        };

        assert_eq!(handoff.total(), 1350);
    }
}
