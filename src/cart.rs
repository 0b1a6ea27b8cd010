//! In-progress cart held by the checkout session.

use serde::{Deserialize, Serialize};

use crate::models::LineItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub unit_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` units of a product. Adding a product already in the
    /// cart bumps its quantity and keeps the original line position.
    pub fn add(
        &mut self,
        product_id: &str,
        name: &str,
        quantity: u32,
        unit_price: f64,
        unit_cost: f64,
    ) -> Result<(), String> {
        if quantity == 0 {
            return Err(format!("Quantity for {name} must be at least 1"));
        }
        if !(unit_price >= 0.0 && unit_price.is_finite()) {
            return Err(format!("Invalid price for {name}: {unit_price}"));
        }
        if !(unit_cost >= 0.0 && unit_cost.is_finite()) {
            return Err(format!("Invalid cost for {name}: {unit_cost}"));
        }

        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = line.quantity.saturating_add(quantity);
            return Ok(());
        }
        self.lines.push(CartLine {
            product_id: product_id.to_string(),
            name: name.to_string(),
            quantity,
            unit_price,
            unit_cost,
        });
        Ok(())
    }

    /// Set a line's quantity; zero removes the line.
    pub fn set_quantity(&mut self, product_id: &str, quantity: u32) {
        if quantity == 0 {
            self.remove(product_id);
            return;
        }
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = quantity;
        }
    }

    pub fn remove(&mut self, product_id: &str) {
        self.lines.retain(|l| l.product_id != product_id);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Take the units of a completed sale out of the cart. Anything added
    /// after the sale was snapshotted stays.
    pub fn remove_sold(&mut self, sold: &[LineItem]) {
        for item in sold {
            if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == item.product_id) {
                line.quantity = line.quantity.saturating_sub(item.quantity);
            }
        }
        self.lines.retain(|l| l.quantity > 0);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn total(&self) -> f64 {
        self.lines
            .iter()
            .map(|l| f64::from(l.quantity) * l.unit_price)
            .sum()
    }

    /// Human-readable summary such as `2x Coke, 1x Water`.
    pub fn items_summary(&self) -> String {
        summarize(self.lines.iter().map(|l| (l.quantity, l.name.as_str())))
    }

    pub fn to_line_items(&self) -> Vec<LineItem> {
        self.lines
            .iter()
            .map(|l| LineItem {
                product_id: l.product_id.clone(),
                name: l.name.clone(),
                quantity: l.quantity,
                unit_price: l.unit_price,
                unit_cost: l.unit_cost,
            })
            .collect()
    }
}

pub(crate) fn summarize<'a>(items: impl Iterator<Item = (u32, &'a str)>) -> String {
    items
        .map(|(qty, name)| format!("{qty}x {name}"))
        .collect::<Vec<_>>()
        .join(", ")
}
