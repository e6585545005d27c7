/// ドメインサービス: 構造スニッフィング
///
/// ファイル先頭の限られたバイト数だけを見て、形式として明らかにおかしいものを
/// 転送前に見つける。ジオメトリの解析は行わない（正式な検証はサーバー側）。
use crate::domain::error::{DomainError, ValidationWarning};
use crate::domain::metadata::{FileMetadata, FileSource};

/// 読み込むヘッダーの上限（バイト）
pub const SNIFF_LIMIT: usize = 512;

/// バイナリSTLのヘッダー長（80バイトのコメント + 4バイトの三角形数）
const STL_BINARY_HEADER_LEN: usize = 84;

/// バイナリSTLの三角形1つあたりのバイト数
const STL_TRIANGLE_LEN: u64 = 50;

/// 宣言サイズと実サイズの許容差（バイト）
const STL_SIZE_TOLERANCE: u64 = 1024;

const OBJ_TOKENS: [&str; 8] = ["v ", "vt ", "vn ", "f ", "#", "o ", "g ", "mtllib"];

/// スニッフィング対象の形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Stl,
    Obj,
    Ply,
}

impl ModelFormat {
    /// 拡張子（ドットなし、大文字小文字を問わない）から判定
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "stl" => Some(Self::Stl),
            "obj" => Some(Self::Obj),
            "ply" => Some(Self::Ply),
            _ => None,
        }
    }
}

/// 構造バリデータ
///
/// 状態を持たないので、異なるファイルに対して並行に呼び出してよい。
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    /// 候補ファイルの先頭 `SNIFF_LIMIT` バイトを読んで検査する
    ///
    /// 読み込み時のI/Oエラーは警告に格下げする（フェイルオープン）。
    pub fn inspect(
        &self,
        source: &FileSource,
        metadata: &FileMetadata,
    ) -> Result<Option<ValidationWarning>, DomainError> {
        match source.read_header(SNIFF_LIMIT) {
            Ok(header) => sniff_header(metadata.extension(), &header, metadata.size(), metadata.name()),
            Err(e) => {
                tracing::warn!(file = metadata.name(), error = %e, "header read failed; skipping structural checks");
                Ok(Some(ValidationWarning::UnreadableHeader {
                    name: metadata.name().to_string(),
                    reason: e.to_string(),
                }))
            }
        }
    }
}

/// 読み込み済みヘッダーを形式ごとに検査する
///
/// 警告は形式ごとに最大1件。
pub fn sniff_header(
    extension: Option<&str>,
    header: &[u8],
    actual_size: u64,
    name: &str,
) -> Result<Option<ValidationWarning>, DomainError> {
    match extension.and_then(ModelFormat::from_extension) {
        Some(ModelFormat::Stl) => Ok(sniff_stl(header, actual_size, name)),
        Some(ModelFormat::Obj) => Ok(sniff_obj(header, name)),
        Some(ModelFormat::Ply) => Ok(sniff_ply(header, name)),
        None if header.is_empty() => Err(DomainError::Corrupted {
            name: name.to_string(),
        }),
        None => Ok(None),
    }
}

fn sniff_stl(header: &[u8], actual_size: u64, name: &str) -> Option<ValidationWarning> {
    // ASCII STLを優先（"solid"で始まるバイナリのコメントもここに入る）
    if header.len() >= 5 && header[..5].eq_ignore_ascii_case(b"solid") {
        return None;
    }

    if header.len() < STL_BINARY_HEADER_LEN {
        return Some(ValidationWarning::UnrecognizedStl {
            name: name.to_string(),
        });
    }

    let triangles = u32::from_le_bytes([header[80], header[81], header[82], header[83]]);
    let expected = STL_BINARY_HEADER_LEN as u64 + u64::from(triangles) * STL_TRIANGLE_LEN;

    if actual_size.abs_diff(expected) > STL_SIZE_TOLERANCE {
        return Some(ValidationWarning::StlSizeMismatch {
            name: name.to_string(),
            triangles,
            expected,
            actual: actual_size,
        });
    }

    None
}

fn sniff_obj(header: &[u8], name: &str) -> Option<ValidationWarning> {
    let text = String::from_utf8_lossy(header);
    if OBJ_TOKENS.iter().any(|token| text.contains(token)) {
        None
    } else {
        Some(ValidationWarning::MissingObjStatements {
            name: name.to_string(),
        })
    }
}

fn sniff_ply(header: &[u8], name: &str) -> Option<ValidationWarning> {
    if header.starts_with(b"ply") {
        None
    } else {
        Some(ValidationWarning::MissingPlyMagic {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 三角形数を埋め込んだバイナリSTLヘッダーを作る
    fn binary_stl_header(triangles: u32) -> Vec<u8> {
        let mut header = vec![0u8; 80];
        header.extend_from_slice(&triangles.to_le_bytes());
        header
    }

    #[test]
    fn test_ascii_stl_passes() {
        let result = sniff_header(Some("stl"), b"solid part\nfacet normal 0 0 1\n", 10_000_000, "part.stl");
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_ascii_stl_case_insensitive() {
        let result = sniff_header(Some("STL"), b"SOLID Part", 10, "part.STL");
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_binary_stl_within_tolerance() {
        let header = binary_stl_header(100);
        // 期待サイズ 84 + 100 * 50 = 5084
        for actual in [5084, 5084 + 1024, 5084 - 1024] {
            let result = sniff_header(Some("stl"), &header, actual, "part.stl");
            assert_eq!(result, Ok(None), "actual size {} should pass", actual);
        }
    }

    #[test]
    fn test_binary_stl_size_mismatch_warns_once() {
        let header = binary_stl_header(100);
        let result = sniff_header(Some("stl"), &header, 5084 + 1025, "part.stl");
        assert!(matches!(
            result,
            Ok(Some(ValidationWarning::StlSizeMismatch {
                triangles: 100,
                expected: 5084,
                ..
            }))
        ));
    }

    #[test]
    fn test_short_non_ascii_stl_warns() {
        let result = sniff_header(Some("stl"), &[0u8; 40], 40, "part.stl");
        assert!(matches!(result, Ok(Some(ValidationWarning::UnrecognizedStl { .. }))));
    }

    #[test]
    fn test_obj_tokens() {
        assert_eq!(sniff_header(Some("obj"), b"# exported\nv 0 0 0\n", 20, "a.obj"), Ok(None));
        assert_eq!(sniff_header(Some("obj"), b"mtllib cube.mtl\n", 20, "a.obj"), Ok(None));
        assert!(matches!(
            sniff_header(Some("obj"), b"PK\x03\x04binary", 20, "a.obj"),
            Ok(Some(ValidationWarning::MissingObjStatements { .. }))
        ));
    }

    #[test]
    fn test_ply_magic() {
        assert_eq!(
            sniff_header(Some("ply"), b"ply\nformat ascii 1.0\n", 30, "a.ply"),
            Ok(None)
        );
        assert!(matches!(
            sniff_header(Some("ply"), b"PLY\n", 4, "a.ply"),
            Ok(Some(ValidationWarning::MissingPlyMagic { .. }))
        ));
    }

    #[test]
    fn test_unknown_format_with_no_bytes_is_corrupted() {
        let result = sniff_header(Some("3mf"), &[], 10, "a.3mf");
        assert!(matches!(result, Err(DomainError::Corrupted { .. })));

        let result = sniff_header(None, b"data", 4, "noext");
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_inspect_downgrades_io_failure() {
        let source = FileSource::Path("/nonexistent/dir/part.stl".into());
        let metadata = FileMetadata::new("part.stl", 100, None, None);

        let result = StructuralValidator.inspect(&source, &metadata);
        assert!(matches!(
            result,
            Ok(Some(ValidationWarning::UnreadableHeader { .. }))
        ));
    }
}
