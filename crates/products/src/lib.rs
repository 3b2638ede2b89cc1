//! Product catalog domain module (event-sourced).
//!
//! Products are what a client business consigns. Pure domain logic: no IO,
//! no HTTP, no storage.

pub mod product;

pub use product::{
    ArchiveProduct, CreateProduct, Product, ProductArchived, ProductCommand, ProductCreated,
    ProductEvent, ProductId, ProductRenamed, ProductStatus, RenameProduct,
};
