use super::*;
use crate::ByteFmt;
use rand::Rng as _;

#[test]
fn test_vectors() {
    // https://github.com/dalek-cryptography/ed25519-dalek/blob/main/TESTVECTORS
    let vectors = [
        (
            "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60",
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a",
            "",
            "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b",
        ),
        (
            "4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb",
            "3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c",
            "72",
            "92a009a9f0d4cab8720e820b5f642540a2b27b5416503f8fb3762223ebdb69da085ac1e43e15996e458f3613d0f11d8c387b2eaeb4302aeeb00d291612bb0c00",
        ),
    ];
    for (secret, public, msg, sig) in vectors {
        let secret = SecretKey::decode(&hex::decode(secret).unwrap()).unwrap();
        let public = PublicKey::decode(&hex::decode(public).unwrap()).unwrap();
        let msg = hex::decode(msg).unwrap();
        let sig = Signature::decode(&hex::decode(sig).unwrap()).unwrap();
        assert_eq!(public, secret.public());
        assert_eq!(sig, secret.sign(&msg));
        public.verify(&msg, &sig).unwrap();
    }
}

#[test]
fn tampered_signature_is_rejected() {
    let rng = &mut rand::thread_rng();
    let key: SecretKey = rng.gen();
    let msg = b"block header";
    let sig = key.sign(msg);
    key.public().verify(msg, &sig).unwrap();

    let mut bytes = sig.to_bytes();
    bytes[5] ^= 1;
    assert!(key.public().verify(msg, &Signature::from_bytes(&bytes)).is_err());
    assert!(key.public().verify(b"other header", &sig).is_err());
    assert!(rng.gen::<PublicKey>().verify(msg, &sig).is_err());
}
