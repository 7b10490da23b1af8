pub(crate) mod health;
pub(crate) mod optimize;
pub(crate) mod prices;
