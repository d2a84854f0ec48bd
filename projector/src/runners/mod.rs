//! The runners owned by the command handler.

pub(crate) mod catch_up;
pub(crate) mod stream_subscription;
pub(crate) mod subscription;

pub(crate) use catch_up::CatchUpRunner;
pub(crate) use stream_subscription::StreamStoreSubscription;
pub(crate) use subscription::SubscriptionRunner;
