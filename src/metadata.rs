//! Metadata program instruction encoding
//!
//! All token metadata bytes are produced here, from typed structs with
//! `borsh` derives, instead of hand-written offsets. The wire schema of the
//! `CreateMetadataAccountV3` instruction is:
//!
//! | field                              | type                 | encoding                         |
//! |------------------------------------|----------------------|----------------------------------|
//! | discriminator                      | u8                   | `33`                             |
//! | data.name                          | string               | u32 LE byte length + UTF-8 bytes |
//! | data.symbol                        | string               | u32 LE byte length + UTF-8 bytes |
//! | data.uri                           | string               | u32 LE byte length + UTF-8 bytes |
//! | data.seller_fee_basis_points       | u16                  | LE                               |
//! | data.creators                      | Option<Vec<Creator>> | tag u8, u32 LE count, items      |
//! | creator.address                    | [u8; 32]             | raw                              |
//! | creator.verified                   | bool                 | u8 0/1                           |
//! | creator.share                      | u8                   | raw                              |
//! | data.collection                    | Option<Collection>   | tag u8 (+ bool, [u8; 32])        |
//! | data.uses                          | Option<Uses>         | tag u8 (+ u8, u64 LE, u64 LE)    |
//! | is_mutable                         | bool                 | u8 0/1                           |
//! | collection_details                 | Option<Details>      | tag u8 (+ variant u8, u64 LE)    |
//!
//! Option tags are `0` for None and `1` for Some. Enum variants are a single
//! u8 index.

use crate::types::TokenRequest;
use borsh::{BorshDeserialize, BorshSerialize};
use serde_json::{json, Map, Value};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

/// Token metadata program id
pub const METADATA_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

/// Seed prefix of metadata PDAs
pub const METADATA_SEED: &[u8] = b"metadata";

/// Instruction discriminator of `CreateMetadataAccountV3`
pub const CREATE_METADATA_ACCOUNT_V3: u8 = 33;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Creator {
    pub address: [u8; 32],
    pub verified: bool,
    /// Royalty share in percent; shares across creators sum to 100
    pub share: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Collection {
    pub verified: bool,
    pub key: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum UseMethod {
    Burn,
    Multiple,
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Uses {
    pub use_method: UseMethod,
    pub remaining: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum CollectionDetails {
    V1 { size: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DataV2 {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub creators: Option<Vec<Creator>>,
    pub collection: Option<Collection>,
    pub uses: Option<Uses>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CreateMetadataAccountArgsV3 {
    pub data: DataV2,
    pub is_mutable: bool,
    pub collection_details: Option<CollectionDetails>,
}

impl CreateMetadataAccountArgsV3 {
    /// Instruction data: discriminator followed by the borsh-encoded args
    pub fn to_instruction_data(&self) -> std::io::Result<Vec<u8>> {
        let mut data = vec![CREATE_METADATA_ACCOUNT_V3];
        data.extend(borsh::to_vec(self)?);
        Ok(data)
    }

    /// Inverse of [`to_instruction_data`](Self::to_instruction_data)
    pub fn from_instruction_data(data: &[u8]) -> std::io::Result<Self> {
        match data.split_first() {
            Some((&CREATE_METADATA_ACCOUNT_V3, rest)) => Self::try_from_slice(rest),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "not a CreateMetadataAccountV3 instruction",
            )),
        }
    }
}

/// Derive the metadata account address for a mint
pub fn find_metadata_address(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[METADATA_SEED, METADATA_PROGRAM_ID.as_ref(), mint.as_ref()],
        &METADATA_PROGRAM_ID,
    )
    .0
}

/// Build the metadata args for a request.
///
/// The requester is recorded as the sole verified creator when creator
/// metadata is present. A revoked update authority makes the metadata
/// immutable.
pub fn metadata_args(request: &TokenRequest) -> CreateMetadataAccountArgsV3 {
    let creators = request.has_creator_metadata().then(|| {
        vec![Creator {
            address: request.wallet_address.to_bytes(),
            verified: true,
            share: 100,
        }]
    });

    CreateMetadataAccountArgsV3 {
        data: DataV2 {
            name: request.name.trim().to_string(),
            symbol: request.symbol.trim().to_string(),
            uri: request.metadata_uri().trim().to_string(),
            seller_fee_basis_points: 0,
            creators,
            collection: None,
            uses: None,
        },
        is_mutable: !request.authorities.update,
        collection_details: None,
    }
}

/// `CreateMetadataAccountV3` instruction.
///
/// Accounts: metadata (w), mint, mint authority (s), payer (s, w),
/// update authority (s), system program.
pub fn create_metadata_instruction(
    metadata: &Pubkey,
    mint: &Pubkey,
    authority: &Pubkey,
    args: &CreateMetadataAccountArgsV3,
) -> std::io::Result<Instruction> {
    Ok(Instruction {
        program_id: METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*metadata, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(*authority, true),
            AccountMeta::new(*authority, true),
            AccountMeta::new_readonly(*authority, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: args.to_instruction_data()?,
    })
}

/// Off-chain metadata document to host behind the metadata URI
pub fn offchain_document(request: &TokenRequest) -> Value {
    let mut doc = Map::new();
    doc.insert("name".into(), json!(request.name.trim()));
    doc.insert("symbol".into(), json!(request.symbol.trim()));
    if let Some(description) = &request.description {
        doc.insert("description".into(), json!(description));
    }
    if let Some(image) = &request.image {
        doc.insert("image".into(), json!(image));
    }

    if !request.social_links.is_empty() {
        doc.insert(
            "extensions".into(),
            serde_json::to_value(&request.social_links).unwrap_or(Value::Null),
        );
    }

    if request.has_creator_metadata() {
        let mut creator = Map::new();
        if let Some(name) = &request.creator_name {
            creator.insert("name".into(), json!(name.trim()));
        }
        if let Some(site) = &request.creator_website {
            creator.insert("site".into(), json!(site));
        }
        creator.insert("address".into(), json!(request.wallet_address.to_string()));
        doc.insert("creator".into(), Value::Object(creator));
    }

    Value::Object(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SocialLinks;

    fn request() -> TokenRequest {
        TokenRequest::new("Test", "TST", "1000", 9, Pubkey::new_unique())
    }

    #[test]
    fn test_minimal_layout_is_byte_exact() {
        let data = metadata_args(&request()).to_instruction_data().unwrap();
        let expected: Vec<u8> = [
            vec![33],
            vec![4, 0, 0, 0],
            b"Test".to_vec(),
            vec![3, 0, 0, 0],
            b"TST".to_vec(),
            vec![0, 0, 0, 0],
            vec![0, 0], // seller fee basis points
            vec![0],    // creators: None
            vec![0],    // collection: None
            vec![0],    // uses: None
            vec![1],    // is_mutable
            vec![0],    // collection_details: None
        ]
        .concat();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_creator_layout() {
        let mut r = request();
        r.creator_name = Some("Alice".into());
        r.metadata_uri = Some("https://x.example/t.json".into());
        r.authorities.update = true;
        let data = metadata_args(&r).to_instruction_data().unwrap();

        let uri = b"https://x.example/t.json";
        let creators_at = 1 + 4 + 4 + 4 + 3 + 4 + uri.len() + 2;
        assert_eq!(data[creators_at], 1, "creators tag");
        assert_eq!(&data[creators_at + 1..creators_at + 5], &[1, 0, 0, 0]);
        assert_eq!(
            &data[creators_at + 5..creators_at + 37],
            r.wallet_address.as_ref()
        );
        assert_eq!(data[creators_at + 37], 1, "verified");
        assert_eq!(data[creators_at + 38], 100, "share");
        // collection, uses, is_mutable, collection_details
        assert_eq!(&data[creators_at + 39..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_matches_encode() {
        let mut r = request();
        r.creator_name = Some("Alice".into());
        let args = metadata_args(&r);
        let decoded =
            CreateMetadataAccountArgsV3::from_instruction_data(&args.to_instruction_data().unwrap())
                .unwrap();
        assert_eq!(decoded, args);
        assert!(CreateMetadataAccountArgsV3::from_instruction_data(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_utf8_lengths_are_bytes() {
        let mut r = request();
        r.name = "Ünï".into();
        let data = metadata_args(&r).to_instruction_data().unwrap();
        assert_eq!(&data[1..5], &[6, 0, 0, 0]);
    }

    #[test]
    fn test_metadata_pda_is_deterministic() {
        let mint = Pubkey::new_unique();
        let a = find_metadata_address(&mint);
        assert_eq!(a, find_metadata_address(&mint));
        assert_ne!(a, find_metadata_address(&Pubkey::new_unique()));
        assert!(!a.is_on_curve());
    }

    #[test]
    fn test_instruction_accounts() {
        let mint = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        let metadata = find_metadata_address(&mint);
        let ix = create_metadata_instruction(&metadata, &mint, &authority, &metadata_args(&request()))
            .unwrap();
        assert_eq!(ix.program_id, METADATA_PROGRAM_ID);
        assert_eq!(ix.accounts.len(), 6);
        assert!(ix.accounts[0].is_writable);
        assert!(ix.accounts[2].is_signer);
        assert!(ix.accounts[3].is_signer && ix.accounts[3].is_writable);
    }

    #[test]
    fn test_offchain_document() {
        let mut r = request();
        r.description = Some("a test token".into());
        r.social_links = SocialLinks {
            website: Some("https://t.example".into()),
            ..Default::default()
        };
        let doc = offchain_document(&r);
        assert_eq!(doc["name"], "Test");
        assert_eq!(doc["extensions"]["website"], "https://t.example");
        assert!(doc.get("creator").is_none());

        r.creator_name = Some("Alice".into());
        let doc = offchain_document(&r);
        assert_eq!(doc["creator"]["name"], "Alice");
    }
}
