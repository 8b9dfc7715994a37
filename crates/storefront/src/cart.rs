//! Cart lines, shipping selection, and totals.
//!
//! The cart stores only product ids and quantities. Prices are resolved
//! against a [`Catalog`] snapshot every time totals are computed, so a
//! catalog refresh is picked up on the next [`Cart::compute_totals`] call.

use bioapp_core::{Price, ProductId, ShippingMethod};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::{Catalog, Product};
use crate::notify::Toast;

/// Flat express shipping fee.
pub const EXPRESS_SHIPPING: Price = Price::from_cents(1000);

/// Standard shipping fee below the free-shipping threshold.
pub const STANDARD_SHIPPING: Price = Price::from_cents(500);

/// Subtotal from which standard shipping is free.
pub const FREE_SHIPPING_THRESHOLD: Price = Price::from_cents(6000);

/// Errors from cart mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Product {0} is not in the cart")]
    LineNotFound(ProductId),

    #[error("Only {available} units of {product_id} in stock (requested {requested})")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },
}

impl CartError {
    /// Warning shown when a cart edit is refused.
    #[must_use]
    pub fn toast(&self) -> Toast {
        match self {
            Self::LineNotFound(_) => Toast::warning("That product is no longer in your cart"),
            Self::InsufficientStock { available, .. } => {
                Toast::warning(format!("Only {available} units available"))
            }
        }
    }
}

/// One product and how many of it the buyer wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// The buyer's cart. At most one line per product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
    shipping: ShippingMethod,
}

impl Cart {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit of a product, creating the line if needed.
    ///
    /// Stock is not checked here; see [`Cart::set_quantity`] and checkout
    /// validation.
    pub fn add_line(&mut self, product_id: ProductId) {
        if let Some(line) = self.line_mut(&product_id) {
            line.quantity = line.quantity.saturating_add(1);
            debug!(product_id = %product_id, quantity = line.quantity, "Incremented cart line");
            return;
        }
        debug!(product_id = %product_id, "Added cart line");
        self.lines.push(CartLine {
            product_id,
            quantity: 1,
        });
    }

    /// Remove a line entirely. Returns whether a line was removed.
    pub fn remove_line(&mut self, product_id: &ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| &line.product_id != product_id);
        self.lines.len() != before
    }

    /// Set a line's quantity, clamped to at least 1.
    ///
    /// Products missing from `catalog` count as having no stock.
    ///
    /// # Errors
    ///
    /// Returns `CartError::LineNotFound` if the product is not in the cart,
    /// or `CartError::InsufficientStock` if the quantity exceeds stock. The
    /// line is left unchanged on error.
    pub fn set_quantity(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
        catalog: &Catalog,
    ) -> Result<(), CartError> {
        let available = catalog.get(product_id).map_or(0, |p| p.stock);
        let line = self
            .line_mut(product_id)
            .ok_or_else(|| CartError::LineNotFound(product_id.clone()))?;

        let quantity = quantity.max(1);
        if quantity > available {
            return Err(CartError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available,
            });
        }

        line.quantity = quantity;
        Ok(())
    }

    pub const fn set_shipping(&mut self, method: ShippingMethod) {
        self.shipping = method;
    }

    /// Empty the cart. The shipping method is kept.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    #[must_use]
    pub const fn shipping(&self) -> ShippingMethod {
        self.shipping
    }

    #[must_use]
    pub fn quantity_of(&self, product_id: &ProductId) -> Option<u32> {
        self.lines
            .iter()
            .find(|line| &line.product_id == product_id)
            .map(|line| line.quantity)
    }

    /// Total units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines
            .iter()
            .fold(0, |acc, line| acc.saturating_add(line.quantity))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Price the cart against a catalog snapshot.
    ///
    /// Lines whose product is missing from the catalog are priced with a
    /// zero-price placeholder and logged as a warning.
    #[must_use]
    pub fn compute_totals(&self, catalog: &Catalog, tax_rate: Decimal) -> OrderDraft {
        let lines: Vec<DraftLine> = self
            .lines
            .iter()
            .map(|line| DraftLine {
                product: catalog.get(&line.product_id).cloned().unwrap_or_else(|| {
                    warn!(
                        product_id = %line.product_id,
                        "Pricing cart line for product missing from catalog"
                    );
                    Product::placeholder(line.product_id.clone())
                }),
                quantity: line.quantity,
            })
            .collect();

        let subtotal: Price = lines.iter().map(DraftLine::line_total).sum();
        let shipping_cost = shipping_cost(self.shipping, subtotal);
        let taxes = subtotal * tax_rate;

        OrderDraft {
            lines,
            shipping_method: self.shipping,
            subtotal,
            shipping_cost,
            taxes,
            total: subtotal + shipping_cost + taxes,
        }
    }

    fn line_mut(&mut self, product_id: &ProductId) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|line| &line.product_id == product_id)
    }
}

/// Shipping fee for a method at a given subtotal.
#[must_use]
pub fn shipping_cost(method: ShippingMethod, subtotal: Price) -> Price {
    match method {
        ShippingMethod::Express => EXPRESS_SHIPPING,
        ShippingMethod::Standard if subtotal >= FREE_SHIPPING_THRESHOLD => Price::ZERO,
        ShippingMethod::Standard => STANDARD_SHIPPING,
    }
}

// =============================================================================
// OrderDraft
// =============================================================================

/// A cart line with its product resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftLine {
    pub product: Product,
    pub quantity: u32,
}

impl DraftLine {
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.product.price * self.quantity
    }

    /// Whether this line can actually be bought.
    #[must_use]
    pub const fn is_purchasable(&self) -> bool {
        self.quantity > 0 && self.product.stock > 0
    }
}

/// Priced snapshot of the cart. Derived, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDraft {
    pub lines: Vec<DraftLine>,
    pub shipping_method: ShippingMethod,
    pub subtotal: Price,
    pub shipping_cost: Price,
    pub taxes: Price,
    pub total: Price,
}

impl OrderDraft {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
