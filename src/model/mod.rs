pub mod issue;
pub mod mail;
pub mod parent;
pub mod work_item;
