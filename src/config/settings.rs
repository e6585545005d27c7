/// アップロード設定（実行時に変更可能な設定面）
///
/// 検証パイプラインとアップロードキューが参照する設定値を保持します。
/// 値の変更は `SettingsPatch` によるマージでのみ行い、
/// 検証に失敗した場合は以前の設定がそのまま残ります（全か無か）。
use crate::config::app::UploadDefaults;
use crate::config::error::ConfigError;
use crate::config::APP_CONFIG;
use serde::{Deserialize, Serialize};

/// 検証済みのアップロード設定
///
/// フィールドは非公開で、`merged` で新しい値を作る以外の経路では変更できません。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSettings {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
    allowed_mime_types: Vec<String>,
    strict_mime_validation: bool,
    max_concurrent_uploads: usize,
}

/// 設定の上書きパッチ
///
/// `None` のフィールドは現在の値を維持します。
/// 数値は負の値も受け取れるよう符号付きで保持し、検証時に弾きます。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_extensions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_mime_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_mime_validation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_uploads: Option<i64>,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self::from_defaults(&APP_CONFIG.upload)
    }
}

impl UploadSettings {
    /// ビルド時設定の `[upload]` セクションから作成
    pub fn from_defaults(defaults: &UploadDefaults) -> Self {
        Self {
            max_file_size: defaults.max_file_size,
            allowed_extensions: normalize_extensions(&defaults.allowed_extensions),
            allowed_mime_types: normalize_mime_types(&defaults.allowed_mime_types),
            strict_mime_validation: defaults.strict_mime_validation,
            max_concurrent_uploads: defaults.max_concurrent_uploads,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// 小文字・ドット付きに正規化済みの拡張子リスト
    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn allowed_mime_types(&self) -> &[String] {
        &self.allowed_mime_types
    }

    pub fn strict_mime_validation(&self) -> bool {
        self.strict_mime_validation
    }

    pub fn max_concurrent_uploads(&self) -> usize {
        self.max_concurrent_uploads
    }

    /// パッチを適用した新しい設定を返す（`self` は変更しない）
    ///
    /// # Errors
    /// 適用後の設定が無効な場合に ConfigError::ValidationError を返します。
    pub fn merged(&self, patch: &SettingsPatch) -> Result<Self, ConfigError> {
        let mut next = self.clone();

        if let Some(size) = patch.max_file_size {
            if size <= 0 {
                return Err(ConfigError::validation_error(format!(
                    "max_file_size must be positive (got {})",
                    size
                )));
            }
            next.max_file_size = size as u64;
        }

        if let Some(extensions) = &patch.allowed_extensions {
            next.allowed_extensions = normalize_extensions(extensions);
        }

        if let Some(mime_types) = &patch.allowed_mime_types {
            next.allowed_mime_types = normalize_mime_types(mime_types);
        }

        if let Some(strict) = patch.strict_mime_validation {
            next.strict_mime_validation = strict;
        }

        if let Some(limit) = patch.max_concurrent_uploads {
            if limit <= 0 {
                return Err(ConfigError::validation_error(format!(
                    "max_concurrent_uploads must be at least 1 (got {})",
                    limit
                )));
            }
            next.max_concurrent_uploads = limit as usize;
        }

        next.validate()?;
        Ok(next)
    }

    /// 設定全体の整合性を検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size == 0 {
            return Err(ConfigError::validation_error(
                "max_file_size must be positive",
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::validation_error(
                "allowed_extensions must not be empty",
            ));
        }
        if self.allowed_mime_types.is_empty() {
            return Err(ConfigError::validation_error(
                "allowed_mime_types must not be empty",
            ));
        }
        if self.max_concurrent_uploads == 0 {
            return Err(ConfigError::validation_error(
                "max_concurrent_uploads must be at least 1",
            ));
        }
        Ok(())
    }
}

impl SettingsPatch {
    /// `key = value` 形式の文字列から1項目を設定する
    ///
    /// リストはカンマ区切りで指定します（例: ".stl,.obj"）。
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "max_file_size" => self.max_file_size = Some(parse_number(key, value)?),
            "max_concurrent_uploads" => {
                self.max_concurrent_uploads = Some(parse_number(key, value)?)
            }
            "allowed_extensions" => self.allowed_extensions = Some(split_list(value)),
            "allowed_mime_types" => self.allowed_mime_types = Some(split_list(value)),
            "strict_mime_validation" => {
                let flag = value.trim().parse::<bool>().map_err(|_| {
                    ConfigError::validation_error(format!(
                        "strict_mime_validation must be 'true' or 'false' (got '{}')",
                        value
                    ))
                })?;
                self.strict_mime_validation = Some(flag);
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// 別のパッチを重ねる（`other` 側に値があればそちらを優先）
    pub fn overlay(&mut self, other: SettingsPatch) {
        if other.max_file_size.is_some() {
            self.max_file_size = other.max_file_size;
        }
        if other.allowed_extensions.is_some() {
            self.allowed_extensions = other.allowed_extensions;
        }
        if other.allowed_mime_types.is_some() {
            self.allowed_mime_types = other.allowed_mime_types;
        }
        if other.strict_mime_validation.is_some() {
            self.strict_mime_validation = other.strict_mime_validation;
        }
        if other.max_concurrent_uploads.is_some() {
            self.max_concurrent_uploads = other.max_concurrent_uploads;
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| {
        ConfigError::validation_error(format!("{} must be an integer (got '{}')", key, value))
    })
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.trim().to_string()).collect()
}

/// 拡張子を小文字・先頭ドット付きに揃え、空要素と重複を除く（順序は維持）
fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for ext in extensions {
        let ext = ext.trim().trim_start_matches('.').to_lowercase();
        if ext.is_empty() {
            continue;
        }
        let ext = format!(".{}", ext);
        if !normalized.contains(&ext) {
            normalized.push(ext);
        }
    }
    normalized
}

fn normalize_mime_types(mime_types: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for mime in mime_types {
        let mime = mime.trim().to_lowercase();
        if !mime.is_empty() && !normalized.contains(&mime) {
            normalized.push(mime);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = UploadSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(
            settings.allowed_extensions(),
            &[".stl".to_string(), ".obj".to_string(), ".ply".to_string()]
        );
    }

    #[test]
    fn test_merge_overrides_only_given_fields() {
        let patch = SettingsPatch {
            max_concurrent_uploads: Some(5),
            strict_mime_validation: Some(true),
            ..Default::default()
        };

        let settings = UploadSettings::default()
            .merged(&patch)
            .expect("patch should apply");

        assert_eq!(settings.max_concurrent_uploads(), 5);
        assert!(settings.strict_mime_validation());
        assert_eq!(settings.max_file_size(), APP_CONFIG.upload.max_file_size);
    }

    #[test]
    fn test_merge_normalizes_extensions() {
        let patch = SettingsPatch {
            allowed_extensions: Some(vec!["STL".into(), " .Obj ".into(), ".stl".into()]),
            ..Default::default()
        };

        let settings = UploadSettings::default().merged(&patch).unwrap();
        assert_eq!(
            settings.allowed_extensions(),
            &[".stl".to_string(), ".obj".to_string()]
        );
    }

    #[test]
    fn test_empty_allow_list_rejected_and_prior_state_kept() {
        let settings = UploadSettings::default();
        let before = settings.clone();
        let patch = SettingsPatch {
            allowed_extensions: Some(vec![]),
            max_concurrent_uploads: Some(8),
            ..Default::default()
        };

        let result = settings.merged(&patch);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
        assert_eq!(settings, before);
    }

    #[test]
    fn test_blank_mime_list_rejected() {
        let patch = SettingsPatch {
            allowed_mime_types: Some(vec!["  ".into()]),
            ..Default::default()
        };
        assert!(UploadSettings::default().merged(&patch).is_err());
    }

    #[test]
    fn test_non_positive_concurrency_rejected() {
        let settings = UploadSettings::default();
        let before = settings.clone();

        for bad in [0, -2] {
            let patch = SettingsPatch {
                max_concurrent_uploads: Some(bad),
                ..Default::default()
            };
            let err = settings.merged(&patch).unwrap_err();
            assert!(err.to_string().contains("max_concurrent_uploads"));
        }
        assert_eq!(settings, before);
    }

    #[test]
    fn test_patch_set_parses_values() {
        let mut patch = SettingsPatch::default();
        patch.set("max_file_size", "2000000").unwrap();
        patch.set("allowed_extensions", ".stl, .3mf").unwrap();
        patch.set("strict_mime_validation", "true").unwrap();

        assert_eq!(patch.max_file_size, Some(2_000_000));
        assert_eq!(
            patch.allowed_extensions,
            Some(vec![".stl".to_string(), ".3mf".to_string()])
        );
        assert_eq!(patch.strict_mime_validation, Some(true));
    }

    #[test]
    fn test_patch_set_rejects_unknown_key_and_bad_values() {
        let mut patch = SettingsPatch::default();
        assert!(matches!(
            patch.set("colour", "blue"),
            Err(ConfigError::UnknownKey { .. })
        ));
        assert!(patch.set("max_file_size", "big").is_err());
        assert!(patch.set("strict_mime_validation", "maybe").is_err());
        assert_eq!(patch, SettingsPatch::default());
    }

    #[test]
    fn test_overlay_prefers_newer_values() {
        let mut base = SettingsPatch {
            max_file_size: Some(10),
            max_concurrent_uploads: Some(2),
            ..Default::default()
        };
        base.overlay(SettingsPatch {
            max_concurrent_uploads: Some(4),
            ..Default::default()
        });

        assert_eq!(base.max_file_size, Some(10));
        assert_eq!(base.max_concurrent_uploads, Some(4));
    }
}
