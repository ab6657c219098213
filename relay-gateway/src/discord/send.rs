pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
pub const RELAY_EMBED_COLOR: u32 = 0x58_65_F2;
pub const WARNING_EMBED_COLOR: u32 = 0xE0_3B_24;

/// Room kept for the closing fence when a chunk ends inside a code block.
const FENCE_CLOSE_RESERVE: usize = 4;
/// Longest fence header (```lang) carried over into the next chunk.
const MAX_FENCE_HEADER: usize = 32;
/// Single lines longer than this are cut hard.
const MAX_PIECE: usize = DISCORD_MESSAGE_LIMIT - MAX_FENCE_HEADER - FENCE_CLOSE_RESERVE - 2;

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Lines (newline included), with over-long lines cut into pieces.
fn pieces(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in content.split_inclusive('\n') {
        if line.chars().count() <= MAX_PIECE {
            out.push(line.to_string());
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        out.extend(chars.chunks(MAX_PIECE).map(|chunk| chunk.iter().collect()));
    }
    out
}

/// Split `content` into messages of at most 2000 characters.
///
/// Splits on line boundaries where possible. A chunk that ends inside a
/// code block is closed, and the next one reopens it with the same header.
pub fn split_message(content: &str) -> Vec<String> {
    if content.chars().count() <= DISCORD_MESSAGE_LIMIT {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut fence_header: Option<String> = None;

    let close = |chunk: &mut String| {
        if !chunk.ends_with('\n') {
            chunk.push('\n');
        }
        chunk.push_str("```");
    };

    for piece in pieces(content) {
        let piece_len = piece.chars().count();
        let toggles = is_fence(&piece);
        let open_after = fence_header.is_some() != toggles;
        let reserve = if open_after { FENCE_CLOSE_RESERVE } else { 0 };

        if current_len + piece_len + reserve > DISCORD_MESSAGE_LIMIT && current_len > 0 {
            if fence_header.is_some() {
                close(&mut current);
            }
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
            if let Some(header) = &fence_header {
                current.push_str(header);
                current.push('\n');
                current_len = header.chars().count() + 1;
            }
        }

        current.push_str(&piece);
        current_len += piece_len;

        if toggles {
            fence_header = match fence_header {
                Some(_) => None,
                None => {
                    let header = piece.trim();
                    Some(if header.chars().count() <= MAX_FENCE_HEADER {
                        header.to_string()
                    } else {
                        "```".to_string()
                    })
                }
            };
        }
    }

    if current_len > 0 {
        if fence_header.is_some() {
            close(&mut current);
        }
        chunks.push(current);
    }
    chunks
}
