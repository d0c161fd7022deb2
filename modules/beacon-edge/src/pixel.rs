/// The fixed response body: a 43-byte transparent 1×1 GIF89a.
///
/// Served for every capture request regardless of parse outcome. The byte
/// layout is header, logical screen descriptor, a two-entry color table, a
/// graphic control extension marking index 0 transparent, the 1×1 image
/// descriptor, minimal LZW data, and the trailer.
pub const TRANSPARENT_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, // "GIF89a"
    0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, // 1x1, global color table of 2
    0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, // palette: black, white
    0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, // GCE: transparent index 0
    0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // image descriptor
    0x02, 0x02, 0x44, 0x01, 0x00, // image data
    0x3B, // trailer
];
