//! Conversions from wire payloads to core types.

use cart_sync_core::{Cart, CartItem, CartItemId, VariantId};
use tracing::warn;

use crate::gateway::GatewayError;
use crate::gateway::types::{CartItemPayload, CartPayload};

/// Convert a server cart, recomputing aggregates from its lines.
///
/// Server-reported aggregates are advisory; a mismatch is logged and the
/// recomputed values win.
pub fn convert_cart(payload: CartPayload) -> Result<Cart, GatewayError> {
    let CartPayload {
        items,
        subtotal,
        item_count,
        total_quantity,
    } = payload;

    let items = items
        .into_iter()
        .map(convert_cart_item)
        .collect::<Result<Vec<_>, _>>()?;
    let cart = Cart::from_items(items);

    if subtotal.is_some_and(|reported| reported != cart.subtotal())
        || total_quantity.is_some_and(|reported| reported != cart.total_quantity())
        || item_count.is_some_and(|reported| reported != cart.item_count())
    {
        warn!(
            reported_subtotal = ?subtotal,
            computed_subtotal = %cart.subtotal(),
            reported_total_quantity = ?total_quantity,
            computed_total_quantity = cart.total_quantity(),
            "Server cart aggregates disagree with its lines"
        );
    }

    Ok(cart)
}

fn convert_cart_item(item: CartItemPayload) -> Result<CartItem, GatewayError> {
    let line_id = item.id.clone();
    let line = CartItem::new(
        CartItemId::new(item.id),
        VariantId::new(item.product_variant_id),
        item.price,
        item.quantity,
    )
    .map_err(|e| GatewayError::Parse(format!("invalid cart line {line_id}: {e}")))?;

    if let Some(reported) = item.subtotal
        && reported != line.subtotal()
    {
        warn!(
            item_id = %line_id,
            reported = %reported,
            computed = %line.subtotal(),
            "Server line subtotal disagrees with price x quantity"
        );
    }

    Ok(line)
}
