pub mod access_point;
pub mod descriptor;
pub mod registry;
pub mod testutil;
pub mod view;

pub use access_point::{AccessPoint, Item, ItemStream, Pushdown};
pub use descriptor::{
    AccessPointDescriptor,
    Cardinality,
    PropertyDescriptor,
    RelationDescriptor,
    SchemaDefinition,
};
pub use registry::{Negotiated, Registry, negotiate};
pub use view::ViewRequest;
