/*!
Backend SDK for [SuperTokens](https://supertokens.com).

SuperTokens splits authentication across three parties: the frontend SDK, the backend SDK
(this crate) and the **core**, a standalone service that owns persistence and signing keys.
Your application talks to the core exclusively through this crate.

# Sessions

The heart of the SDK is session management:

- An **access token** is a short-lived, signed JWT. It's verified locally, against the public keys
  published by the core, on (almost) every request.
- A **refresh token** is a long-lived opaque token. It's exchanged for a new pair of tokens when
  the access token expires. The core rotates refresh tokens on every exchange: presenting a
  refresh token that has already been rotated out is treated as **token theft**, and the whole
  session is revoked.
- **Claims** are named pieces of state embedded in the access token payload (e.g. "the email is
  verified", "the user has completed MFA"). Recipes register claims and validators; every
  verified session is checked against them.

# Getting started

Build a [`SuperTokens`] application context once, at startup, and share it across requests:

```rust,no_run
use supertokens::{AppInfo, SuperTokens};
use supertokens::core::{Core, HttpCore, HttpCoreConfig};
use supertokens::session::SessionConfig;

# async fn run() -> Result<(), anyhow::Error> {
let core = HttpCore::new(HttpCoreConfig::new("http://localhost:3567"))?;
let app = SuperTokens::builder(
    AppInfo::new("my-app", "https://api.example.com", "https://example.com"),
    Core::new(core),
)
.session(SessionConfig::default())
.build()?;
# Ok(())
# }
```

Then, in your request handlers, use [`SessionRecipe::get_session`](session::SessionRecipe::get_session)
to retrieve the session attached to the incoming request.
*/
pub mod app;
pub mod claims;
pub mod context;
pub mod core;
pub mod framework;
pub mod recipe;
pub mod session;
pub mod settings;

pub use app::{AppInfo, SuperTokens};
pub use context::UserContext;
pub use session::{SessionContainer, SessionRecipe};

/// A JSON object, used for access token payloads and claim updates.
pub type Payload = serde_json::Map<String, serde_json::Value>;
