use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::server::utils::classify_utils::ResourceKind;

type HmacSha256 = Hmac<Sha256>;

/// handle table bounds. 100k live handles covers a few thousand concurrent
/// viewers, anything past that means someone is scraping us
const HANDLE_TABLE_CAPACITY: u64 = 100_000;
const HANDLE_TTL_SECS: u64 = 600;

pub struct SignatureUtil {
    secret: String,
}

impl SignatureUtil {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// sig is based on: handle_id + expiry + resource kind tag + secret
    pub fn generate_signature(&self, handle_id: &str, expiry: i64, kind_tag: &str) -> String {
        let message = format!("{}{}{}", handle_id, expiry, kind_tag);

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");

        mac.update(message.as_bytes());

        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify_signature(
        &self,
        handle_id: &str,
        expiry: i64,
        kind_tag: &str,
        signature: &str,
    ) -> bool {
        if unix_now() > expiry {
            return false;
        }

        // see if we can regenerate the signature, if we can then it's valid.
        // compare without short-circuiting so timing doesn't leak a prefix
        let expected = self.generate_signature(handle_id, expiry, kind_tag);

        signature.len() == expected.len()
            && signature
                .as_bytes()
                .iter()
                .zip(expected.as_bytes().iter())
                .fold(0, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    pub fn generate_expiry(seconds: u64) -> i64 {
        unix_now() + seconds as i64
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// what a minted handle resolves back into
#[derive(Debug, Clone)]
pub struct HandleEntry {
    pub origin_url: String,
    pub referer: Option<String>,
    pub kind: ResourceKind,
    pub expiry: i64,
}

/// bounded table of signed segment handles.
///
/// external form is `handleId|expiry|hmac(secret, handleId + expiry + kind)`.
/// a handle redeems iff the mac matches, the expiry hasn't passed and the id
/// is still in the table. the table evicts on both ttl and capacity so a
/// scrape run can't balloon memory.
pub struct HandleStore {
    table: moka::sync::Cache<String, HandleEntry>,
    signer: SignatureUtil,
}

impl HandleStore {
    pub fn new(signer: SignatureUtil) -> Self {
        let table = moka::sync::Cache::builder()
            .max_capacity(HANDLE_TABLE_CAPACITY)
            .time_to_live(Duration::from_secs(HANDLE_TTL_SECS))
            .build();

        Self { table, signer }
    }

    /// mint a signed handle string for an origin url
    pub fn mint(&self, origin_url: &str, referer: Option<&str>, kind: ResourceKind) -> String {
        let handle_id = Uuid::new_v4().to_string();
        let expiry = SignatureUtil::generate_expiry(HANDLE_TTL_SECS);
        let signature = self.signer.generate_signature(&handle_id, expiry, kind.as_tag());

        self.table.insert(
            handle_id.clone(),
            HandleEntry {
                origin_url: origin_url.to_string(),
                referer: referer.map(str::to_string),
                kind,
                expiry,
            },
        );

        format!("{}|{}|{}", handle_id, expiry, signature)
    }

    /// redeem an external handle string back into its origin reference.
    /// returns None for anything malformed, expired, forged or evicted
    pub fn redeem(&self, handle: &str) -> Option<HandleEntry> {
        let mut parts = handle.splitn(3, '|');
        let handle_id = parts.next()?;
        let expiry: i64 = parts.next()?.parse().ok()?;
        let signature = parts.next()?;

        let entry = self.table.get(handle_id)?;

        // the stored expiry is authoritative, a client can't extend its own lease
        if expiry != entry.expiry {
            return None;
        }

        if !self
            .signer
            .verify_signature(handle_id, expiry, entry.kind.as_tag(), signature)
        {
            return None;
        }

        Some(entry)
    }
}
