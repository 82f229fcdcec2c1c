pub mod address;
pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_product;
pub mod payment;
pub mod point;
pub mod product;
pub mod user;

pub use address::Entity as Address;
pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use order::Entity as Order;
pub use order_product::Entity as OrderProduct;
pub use payment::Entity as Payment;
pub use point::Entity as Point;
pub use product::Entity as Product;
pub use user::Entity as User;
