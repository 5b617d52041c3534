pub mod cipher;
pub mod credentials;
pub mod params;
pub mod signing;

pub use cipher::{CipherError, ClientGroupCipher, GroupCipher, OpenedPresentation};
pub use credentials::{
    AuthCredential, AuthCredentialPresentation, AuthCredentialResponse, ProfileKeyCredential,
    ProfileKeyCredentialPresentation,
};
pub use params::{
    GroupMasterKey, GroupPublicParams, GroupSecretParams, ServerPublicParams, ServerSecretParams,
};
