pub mod conversation_service;
pub mod delivery_service;
pub mod media_client;
pub mod message_service;
pub mod sync_service;

pub use conversation_service::ConversationService;
pub use delivery_service::DeliveryService;
pub use media_client::{DbMediaClient, MediaReadiness, NoopMediaClient};
pub use message_service::{MessageService, SendMessageInput, SendOutcome};
pub use sync_service::SyncService;
