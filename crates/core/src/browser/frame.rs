//! Image header sniffing for captured frames.

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Width and height of a PNG or baseline/progressive JPEG, read from its header.
pub fn frame_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
	png_dimensions(bytes).or_else(|| jpeg_dimensions(bytes))
}

fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
	if bytes.len() < 24 || bytes[..8] != PNG_SIGNATURE || &bytes[12..16] != b"IHDR" {
		return None;
	}
	let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
	let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
	Some((width, height))
}

fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
	if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
		return None;
	}
	let mut i = 2;
	while i + 9 <= bytes.len() {
		if bytes[i] != 0xFF {
			i += 1;
			continue;
		}
		let marker = bytes[i + 1];
		match marker {
			// fill byte
			0xFF => {
				i += 1;
				continue;
			}
			// standalone markers carry no length
			0x01 | 0xD0..=0xD8 => {
				i += 2;
				continue;
			}
			0xD9 | 0xDA => return None,
			_ => {}
		}
		let length = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
		if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
			let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]);
			let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]);
			return Some((width as u32, height as u32));
		}
		i += 2 + length;
	}
	None
}
