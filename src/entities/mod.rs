//! SeaORM entities backing the stock ledger.
//!
//! `inventory_location` is the authoritative per-(tenant, product, location)
//! balance; `stock_transfer` is the append-only movement log. `product`
//! carries a denormalized total quantity that the movement processor keeps in
//! sync with the per-location balances.

pub mod inventory_location;
pub mod location;
pub mod product;
pub mod stock_transfer;
