//! Price a cart without submitting it.

use bioapp_core::{ProductId, ShippingMethod};
use bioapp_storefront::cart::OrderDraft;
use bioapp_storefront::config::StorefrontConfig;
use bioapp_storefront::session::Session;

/// Build a cart from `product_ids` (one unit per occurrence) and log its totals.
pub async fn run(
    config: &StorefrontConfig,
    product_ids: &[String],
    shipping: ShippingMethod,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, store) = super::load_catalog(config).await?;
    let mut session = Session::from_config(store, config);
    fill_cart(&mut session, product_ids, shipping);

    log_draft(&session.totals());
    Ok(())
}

pub fn fill_cart(session: &mut Session, product_ids: &[String], shipping: ShippingMethod) {
    for id in product_ids {
        session.add_to_cart(ProductId::new(id.as_str()));
    }
    session.set_shipping(shipping);
}

pub fn log_draft(draft: &OrderDraft) {
    for line in &draft.lines {
        tracing::info!(
            id = %line.product.id,
            quantity = line.quantity,
            unit = %line.product.price.display_mxn(),
            line_total = %line.line_total().display_mxn(),
            stock = line.product.stock,
            "{}",
            line.product.name
        );
    }
    tracing::info!(
        subtotal = %draft.subtotal.display_mxn(),
        shipping = %draft.shipping_cost.display_mxn(),
        method = %draft.shipping_method,
        taxes = %draft.taxes.display_mxn(),
        "Total: {}",
        draft.total.display_mxn()
    );
}
