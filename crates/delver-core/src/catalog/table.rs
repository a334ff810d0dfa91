//! The built-in format table.
//!
//! Order matters: signatures are tested top to bottom, so longer and more
//! specific magics come before short ones that could collide with them.

use super::{Category, FormatDescriptor};
use crate::handler::HandlerId;

pub(super) fn builtin_entries() -> Vec<FormatDescriptor> {
    use Category::*;

    vec![
        // Containers
        FormatDescriptor::signed("zip", 0, b"PK\x03\x04", Archive)
            .with_handler(HandlerId::ZIP)
            .carvable(),
        FormatDescriptor::signed("pack", 0, b"PACK", Archive)
            .with_handler(HandlerId::PACK)
            .carvable(),
        FormatDescriptor::signed("7z", 0, b"7z\xBC\xAF\x27\x1C", Archive).carvable(),
        FormatDescriptor::signed("rar", 0, b"Rar!\x1A\x07", Archive).carvable(),
        FormatDescriptor::signed("tar", 257, b"ustar", Archive),
        FormatDescriptor::signed("iso", 0x8001, b"CD001", Disk),
        FormatDescriptor::signed("vhd", 0, b"conectix", Disk),
        // Compressed streams
        FormatDescriptor::signed("gz", 0, b"\x1F\x8B\x08", Compressed)
            .with_handler(HandlerId::GZIP)
            .carvable(),
        FormatDescriptor::signed("xz", 0, b"\xFD7zXZ\x00", Compressed).carvable(),
        FormatDescriptor::signed("zst", 0, b"\x28\xB5\x2F\xFD", Compressed).carvable(),
        FormatDescriptor::signed("bz2", 0, b"BZh", Compressed),
        // Textures and images
        FormatDescriptor::signed("png", 0, b"\x89PNG\r\n\x1A\n", Texture).carvable(),
        FormatDescriptor::signed("dds", 0, b"DDS \x7C\x00\x00\x00", Texture).carvable(),
        FormatDescriptor::signed("ktx", 0, b"\xABKTX 11\xBB", Texture).carvable(),
        FormatDescriptor::signed("ktx2", 0, b"\xABKTX 20\xBB", Texture).carvable(),
        FormatDescriptor::signed("gif", 0, b"GIF89a", Texture).carvable(),
        FormatDescriptor::signed("gif", 0, b"GIF87a", Texture).carvable(),
        FormatDescriptor::signed("jpg", 0, b"\xFF\xD8\xFF", Texture),
        FormatDescriptor::signed("webp", 8, b"WEBP", Texture),
        // Audio
        FormatDescriptor::signed("wav", 8, b"WAVE", Audio),
        FormatDescriptor::signed("ogg", 0, b"OggS", Audio).carvable(),
        FormatDescriptor::signed("flac", 0, b"fLaC", Audio),
        // Models
        FormatDescriptor::signed("glb", 0, b"glTF", Model).carvable(),
        FormatDescriptor::signed("fbx", 0, b"Kaydara FBX Binary", Model),
        // Executables
        FormatDescriptor::signed("elf", 0, b"\x7FELF", Executable),
        // zlib and MBR magics are short and weak, so they go last
        FormatDescriptor::signed("zlib", 0, b"\x78\x9C", Compressed).with_handler(HandlerId::ZLIB),
        FormatDescriptor::signed("zlib", 0, b"\x78\xDA", Compressed).with_handler(HandlerId::ZLIB),
        FormatDescriptor::signed("zlib", 0, b"\x78\x01", Compressed).with_handler(HandlerId::ZLIB),
        FormatDescriptor::signed("img", 510, b"\x55\xAA", Disk).with_handler(HandlerId::MBR),
        // Extension-only entries
        FormatDescriptor::by_extension("tga", Texture),
        FormatDescriptor::by_extension("bmp", Texture),
        FormatDescriptor::by_extension("tex", Texture),
        FormatDescriptor::by_extension("obj", Model),
        FormatDescriptor::by_extension("mp3", Audio),
        FormatDescriptor::by_extension("exe", Executable),
        FormatDescriptor::by_extension("dll", Executable),
        FormatDescriptor::by_extension("txt", Text),
        FormatDescriptor::by_extension("ini", Text),
        FormatDescriptor::by_extension("xml", Text),
        FormatDescriptor::by_extension("json", Text),
        FormatDescriptor::by_extension("cfg", Text),
    ]
}
