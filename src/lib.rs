pub mod pl;
