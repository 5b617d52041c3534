#![no_main]
use libfuzzer_sys::fuzz_target;
use arbitrary::Arbitrary;

use shield_groups::crypto::{GroupMasterKey, GroupSecretParams, ServerSecretParams};
use shield_groups::{GroupsConfig, GroupsV2Operations};

/// Fuzz the group cipher.
///
/// Tests:
/// - encrypt_blob / decrypt_blob round-trip
/// - Tampered and random ciphertexts are rejected without panicking
/// - Fail-soft attribute decryption on arbitrary input

#[derive(Arbitrary, Debug)]
struct BlobInput {
    master_key: [u8; 32],
    plaintext: Vec<u8>,
    /// Bytes fed straight to the decryptors
    random_blob: Vec<u8>,
    /// Index of the byte to flip in a valid ciphertext
    flip_at: u16,
}

fuzz_target!(|input: BlobInput| {
    if input.plaintext.len() > 65536 {
        return;
    }

    let params = match GroupSecretParams::derive_from_master_key(&GroupMasterKey(input.master_key)) {
        Ok(params) => params,
        Err(_) => return,
    };

    if let Ok(blob) = params.encrypt_blob(&input.plaintext) {
        let opened = params.decrypt_blob(&blob).expect("decrypt own blob");
        assert_eq!(opened, input.plaintext);

        let mut tampered = blob.clone();
        let index = input.flip_at as usize % tampered.len();
        tampered[index] ^= 0x01;
        assert!(params.decrypt_blob(&tampered).is_err());
    }

    let _ = params.decrypt_blob(&input.random_blob);

    let server = ServerSecretParams::generate();
    let ops = GroupsV2Operations::new(server.public_params(), GroupsConfig::default());
    let group = ops.for_group(&params);
    let _ = group.decrypt_title(&input.random_blob);
    let _ = group.decrypt_timer(&input.random_blob);
    let _ = group.decrypt_service_id(&input.random_blob);
});
