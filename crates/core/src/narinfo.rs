//! `.narinfo` text documents, as served by binary caches.

use crate::hash::{Hash, HashAlgorithm};
use crate::path_info::ValidPathInfo;
use crate::store_path::StoreDir;

/// Path metadata plus the location of its NAR within a binary cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarInfo {
    pub info: ValidPathInfo,
    /// Location of the NAR, relative to the cache root.
    pub url: String,
    /// Compression applied to the file at `url`.
    pub compression: String,
    pub file_hash: Option<Hash>,
    pub file_size: Option<u64>,
}

impl NarInfo {
    /// Describe an uncompressed NAR stored at `nar/<hash part>.nar`.
    pub fn uncompressed(info: ValidPathInfo) -> Self {
        let url = format!("nar/{}.nar", info.path.hash_part());
        Self {
            file_hash: info.nar_hash.clone(),
            file_size: Some(info.nar_size),
            info,
            url,
            compression: "none".to_string(),
        }
    }

    pub fn to_narinfo_text(&self) -> String {
        let info = &self.info;
        let mut lines = vec![
            format!("StorePath: {}", info.path),
            format!("URL: {}", self.url),
            format!("Compression: {}", self.compression),
        ];
        if let Some(hash) = &self.file_hash {
            lines.push(format!("FileHash: {}", hash.to_typed_nix32()));
        }
        if let Some(size) = self.file_size {
            lines.push(format!("FileSize: {size}"));
        }
        if let Some(hash) = &info.nar_hash {
            lines.push(format!("NarHash: {}", hash.to_typed_nix32()));
        }
        lines.push(format!("NarSize: {}", info.nar_size));
        if !info.references.is_empty() {
            lines.push(format!("References: {}", info.short_refs().join(" ")));
        }
        if let Some(deriver) = &info.deriver {
            lines.push(format!("Deriver: {}", deriver.base_name()));
        }
        for sig in &info.sigs {
            lines.push(format!("Sig: {sig}"));
        }
        lines.join("\n") + "\n"
    }

    /// Parse narinfo text, resolving base names against `store`.
    ///
    /// Unknown keys are ignored.
    pub fn parse(store: &StoreDir, text: &str) -> crate::Result<Self> {
        let mut path = None;
        let mut url = None;
        let mut compression = "bzip2".to_string();
        let mut file_hash = None;
        let mut file_size = None;
        let mut nar_hash = None;
        let mut nar_size = None;
        let mut references = Vec::new();
        let mut deriver = None;
        let mut sigs = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| crate::Error::NarInfoParse(format!("invalid line: {line}")))?;

            match key {
                "StorePath" => path = Some(store.parse_path(value)?),
                "URL" => url = Some(value.to_string()),
                "Compression" => compression = value.to_string(),
                "FileHash" => file_hash = Some(parse_hash(value)?),
                "FileSize" => file_size = Some(parse_size("FileSize", value)?),
                "NarHash" => nar_hash = Some(parse_hash(value)?),
                "NarSize" => nar_size = Some(parse_size("NarSize", value)?),
                "References" => {
                    for r in value.split_whitespace() {
                        references.push(store.parse_base_name(r).map_err(|e| {
                            crate::Error::NarInfoParse(format!("invalid reference '{r}': {e}"))
                        })?);
                    }
                }
                "Deriver" if value != "unknown-deriver" => {
                    deriver = Some(store.parse_base_name(value).map_err(|e| {
                        crate::Error::NarInfoParse(format!("invalid deriver '{value}': {e}"))
                    })?);
                }
                "Sig" => sigs.push(value.to_string()),
                _ => {}
            }
        }

        let path = path.ok_or_else(|| crate::Error::NarInfoParse("missing StorePath".to_string()))?;
        let url = url.ok_or_else(|| crate::Error::NarInfoParse("missing URL".to_string()))?;
        let nar_hash = nar_hash.ok_or_else(|| crate::Error::NarInfoParse("missing NarHash".to_string()))?;
        let nar_size = nar_size.ok_or_else(|| crate::Error::NarInfoParse("missing NarSize".to_string()))?;

        let mut info = ValidPathInfo::with_nar(path, nar_hash, nar_size);
        info.references = references.into_iter().collect();
        info.deriver = deriver;
        info.sigs = sigs.into_iter().collect();

        Ok(Self {
            info,
            url,
            compression,
            file_hash,
            file_size,
        })
    }
}

fn parse_hash(value: &str) -> crate::Result<Hash> {
    if value.contains(':') || value.contains('-') {
        Hash::parse_typed(value)
    } else {
        Hash::parse_with_algorithm(HashAlgorithm::Sha256, value)
    }
}

fn parse_size(key: &str, value: &str) -> crate::Result<u64> {
    value
        .parse()
        .map_err(|e| crate::Error::NarInfoParse(format!("invalid {key}: {e}")))
}
