//! File format detection for reassembled resources.
//!
//! Zero dependencies. Detection is a single ordered table of signatures; the
//! first entry whose every part matches wins.

/// Formats recognised in backup resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Webp,
    /// SILK voice note
    Aud,
    Amr,
    Wav,
    Mp3,
    QuickTime,
    Mp4,
    Pdf,
    Doc,
    Xls,
    Ppt,
    Rar,
    Zip,
    SevenZip,
    Gzip,
}

impl FileKind {
    /// Extension with the leading dot, as used in output file names.
    pub const fn dotted_extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::Gif => ".gif",
            Self::Bmp => ".bmp",
            Self::Webp => ".webp",
            Self::Aud => ".aud",
            Self::Amr => ".amr",
            Self::Wav => ".wav",
            Self::Mp3 => ".mp3",
            Self::QuickTime => ".mov",
            Self::Mp4 => ".mp4",
            Self::Pdf => ".pdf",
            Self::Doc => ".doc",
            Self::Xls => ".xls",
            Self::Ppt => ".ppt",
            Self::Rar => ".rar",
            Self::Zip => ".zip",
            Self::SevenZip => ".7z",
            Self::Gzip => ".gz",
        }
    }

    /// Extension without the leading dot.
    pub fn extension(self) -> &'static str {
        &self.dotted_extension()[1..]
    }
}

/// One table entry: `kind` matches when every `(offset, magic)` part does.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub kind: FileKind,
    pub parts: &'static [(usize, &'static [u8])],
}

impl Signature {
    pub fn matches(&self, data: &[u8]) -> bool {
        self.parts.iter().all(|&(offset, magic)| {
            data.get(offset..offset + magic.len())
                .is_some_and(|window| window == magic)
        })
    }
}

const OLE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const RAR15: &[u8] = b"Rar!\x1a\x07\x00";
const RAR50: &[u8] = b"Rar!\x1a\x07\x01\x00";

const fn sig(kind: FileKind, parts: &'static [(usize, &'static [u8])]) -> Signature {
    Signature { kind, parts }
}

/// Detection table, in priority order.
///
/// OLE compound documents are told apart by the sub-header at offset 512;
/// more specific entries come before the general ones they overlap.
pub static SIGNATURES: &[Signature] = &[
    sig(FileKind::Jpeg, &[(0, &[0xFF, 0xD8, 0xFF, 0xE0])]),
    sig(FileKind::Jpeg, &[(0, &[0xFF, 0xD8, 0xFF, 0xE1])]),
    sig(FileKind::Jpeg, &[(0, &[0xFF, 0xD8, 0xFF, 0xDB])]),
    sig(FileKind::Png, &[(0, b"\x89PNG\r\n\x1a\n")]),
    sig(FileKind::Gif, &[(0, b"GIF87a")]),
    sig(FileKind::Gif, &[(0, b"GIF89a")]),
    sig(FileKind::Webp, &[(0, b"RIFF"), (8, b"WEBP")]),
    sig(FileKind::Wav, &[(0, b"RIFF"), (8, b"WAVE")]),
    sig(FileKind::Aud, &[(1, b"#!SILK_V3")]),
    sig(FileKind::Amr, &[(0, b"#!AMR\n")]),
    sig(FileKind::Mp3, &[(0, b"ID3")]),
    sig(FileKind::QuickTime, &[(4, b"ftypqt")]),
    sig(FileKind::QuickTime, &[(4, b"moov")]),
    sig(FileKind::Mp4, &[(4, b"ftyp")]),
    sig(FileKind::Pdf, &[(0, b"%PDF")]),
    sig(FileKind::Doc, &[(0, OLE), (512, &[0xEC, 0xA5, 0xC1, 0x00])]),
    sig(FileKind::Xls, &[(0, OLE), (512, &[0xFD, 0xFF, 0xFF, 0xFF, 0x00])]),
    sig(FileKind::Xls, &[(0, OLE), (512, &[0xFD, 0xFF, 0xFF, 0xFF, 0x02])]),
    sig(
        FileKind::Xls,
        &[(0, OLE), (512, &[0x09, 0x08, 0x10, 0x00, 0x00, 0x06, 0x05, 0x00])],
    ),
    sig(FileKind::Ppt, &[(0, OLE), (512, &[0xA0, 0x46, 0x1D, 0xF0])]),
    sig(FileKind::Ppt, &[(0, OLE), (512, &[0x00, 0x6E, 0x1E, 0xF0])]),
    sig(FileKind::Ppt, &[(0, OLE), (512, &[0x0F, 0x00, 0xE8, 0x03])]),
    sig(
        FileKind::Ppt,
        &[(0, OLE), (512, &[0xFD, 0xFF, 0xFF, 0xFF]), (517, &[0x00, 0x00])],
    ),
    sig(FileKind::Rar, &[(0, RAR50)]),
    sig(FileKind::Rar, &[(0, RAR15)]),
    sig(FileKind::Zip, &[(0, b"PK\x03\x04")]),
    sig(FileKind::SevenZip, &[(0, &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C])]),
    sig(FileKind::Gzip, &[(0, &[0x1F, 0x8B, 0x08])]),
    sig(FileKind::Bmp, &[(0, b"BM")]),
    sig(FileKind::Mp3, &[(0, &[0xFF, 0xFB])]),
];

/// Detect the format of `data`.
pub fn sniff(data: &[u8]) -> Option<FileKind> {
    SIGNATURES
        .iter()
        .find(|signature| signature.matches(data))
        .map(|signature| signature.kind)
}

/// `".ext"` for a recognised format, `""` otherwise.
pub fn extension(data: &[u8]) -> &'static str {
    sniff(data).map_or("", FileKind::dotted_extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ole_with(sub: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 600];
        data[..8].copy_from_slice(OLE);
        data[512..512 + sub.len()].copy_from_slice(sub);
        data
    }

    #[test]
    fn test_common_formats() {
        assert_eq!(extension(b"%PDF-1.7\n"), ".pdf");
        assert_eq!(extension(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]), ".jpg");
        assert_eq!(extension(&[0xFF, 0xD8, 0xFF, 0xE1]), ".jpg");
        assert_eq!(extension(b"\x89PNG\r\n\x1a\n\0\0"), ".png");
        assert_eq!(extension(b"PK\x03\x04rest"), ".zip");
        assert_eq!(extension(b"Rar!\x1a\x07\x01\x00"), ".rar");
        assert_eq!(extension(b"Rar!\x1a\x07\x00"), ".rar");
        assert_eq!(extension(b"GIF89a"), ".gif");
    }

    #[test]
    fn test_unknown_is_empty() {
        assert_eq!(extension(b"just some text"), "");
        assert_eq!(extension(&[]), "");
        assert_eq!(sniff(&[0xFF, 0xD8]), None);
    }

    #[test]
    fn test_offset_signatures() {
        assert_eq!(sniff(b"\x02#!SILK_V3\x0c\x00"), Some(FileKind::Aud));
        assert_eq!(sniff(b"\0\0\0\x20ftypisom"), Some(FileKind::Mp4));
        assert_eq!(sniff(b"\0\0\0\x14ftypqt  "), Some(FileKind::QuickTime));
        assert_eq!(sniff(b"\0\0\0\x08moov"), Some(FileKind::QuickTime));
        assert_eq!(sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(FileKind::Webp));
        assert_eq!(sniff(b"RIFF\0\0\0\0WAVEfmt "), Some(FileKind::Wav));
        assert_eq!(sniff(b"RIFF\0\0\0\0AVI "), None);
    }

    #[test]
    fn test_ole_refinement() {
        assert_eq!(sniff(&ole_with(&[0xEC, 0xA5, 0xC1, 0x00])), Some(FileKind::Doc));
        assert_eq!(sniff(&ole_with(&[0xFD, 0xFF, 0xFF, 0xFF, 0x02])), Some(FileKind::Xls));
        assert_eq!(sniff(&ole_with(&[0xA0, 0x46, 0x1D, 0xF0])), Some(FileKind::Ppt));
        assert_eq!(
            sniff(&ole_with(&[0xFD, 0xFF, 0xFF, 0xFF, 0x10, 0x00, 0x00])),
            Some(FileKind::Ppt)
        );
        // compound document without a known sub-header, or cut short
        assert_eq!(sniff(&ole_with(&[0x11, 0x22, 0x33, 0x44])), None);
        assert_eq!(sniff(OLE), None);
    }

    #[test]
    fn test_table_extensions_agree() {
        for signature in SIGNATURES {
            let ext = signature.kind.extension();
            assert!(!ext.is_empty() && !ext.starts_with('.'));
        }
        assert_eq!(extension(b"%PDF"), format!(".{}", FileKind::Pdf.extension()));
    }
}
