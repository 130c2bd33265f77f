pub mod checkpoint;
pub mod codec;
pub mod db;
pub mod dispatcher;
pub mod hub_client;
pub mod reconciler;
pub mod repo;
pub mod subscriber;
