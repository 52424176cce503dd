#![warn(clippy::pedantic, elided_lifetimes_in_paths, explicit_outlives_requirements)]
#![allow(non_snake_case)]

use {
	core::iter,
	dump::MapAreaTexture,
	log::{debug, warn},
	std::{
		fs,
		io::{self, Write},
		path::{Path, PathBuf},
	},
	thiserror::Error,
};

pub use {canvas::IndexedCanvas, color::ColorFormatError};

pub const DEFAULT_DUMP_PATH: &str = "MapAreaDump_2024.03.05-11.57.55.json";
pub const RGB_SIZE: usize = 3;
pub const RGBA_SIZE: usize = 4;
pub const PAL_MAX_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum ParseError {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("cannot parse {path:?}")]
	Parse {
		path: PathBuf,
		#[source]
		source: ParseError,
	},
	#[error("map area texture has mistyped fields")]
	Malformed(#[source] serde_json::Error),
	#[error("mAreaData is not valid base64")]
	AreaData(#[from] base64::DecodeError),
	#[error("mAreaData is empty, there is nothing to draw")]
	EmptyAreaData,
	#[error(transparent)]
	ColorFormat(#[from] ColorFormatError),
	#[error("cannot write {path:?}")]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("cannot encode {path:?}")]
	Encode {
		path: PathBuf,
		#[source]
		source: png::EncodingError,
	},
	#[error("cannot print the summary")]
	Console(#[source] io::Error),
}

pub mod color {
	use {super::RGBA_SIZE, thiserror::Error};

	pub type Rgba = [u8; RGBA_SIZE];

	pub const OPAQUE: u8 = u8::MAX;

	#[derive(Debug, Error, PartialEq, Eq)]
	#[error("{hex:?} is not a hex color")]
	pub struct ColorFormatError {
		pub hex: String,
	}

	/// Resolves `rgb`, `rgba`, `rrggbb` or `rrggbbaa`, with or without a leading `#`.
	/// Alpha is [`OPAQUE`] unless the string carries it.
	pub fn parseHex(hex: &str) -> Result<Rgba, ColorFormatError> {
		let digits = hex.strip_prefix('#').unwrap_or(hex);
		let formatError = || ColorFormatError { hex: hex.to_owned() };
		// from_str_radix alone would accept a sign
		if !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
			return Err(formatError());
		}
		let component =
			|at: usize, width: usize| u8::from_str_radix(&digits[at..at + width], 16).map_err(|_| formatError());
		let mut rgba = [0, 0, 0, OPAQUE];
		match digits.len() {
			n @ (3 | 4) => {
				for (i, channel) in rgba[..n].iter_mut().enumerate() {
					*channel = component(i, 1)? * 0x11;
				}
			}
			n @ (6 | 8) => {
				for (i, channel) in rgba[..n / 2].iter_mut().enumerate() {
					*channel = component(2 * i, 2)?;
				}
			}
			_ => return Err(formatError()),
		}
		Ok(rgba)
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn sixDigitsAreOpaque() {
			assert_eq!(parseHex("ff0000"), Ok([0xFF, 0, 0, OPAQUE]));
			assert_eq!(parseHex("#00Ff00"), Ok([0, 0xFF, 0, OPAQUE]));
		}

		#[test]
		fn eightDigitsCarryAlpha() {
			assert_eq!(parseHex("1020307F"), Ok([0x10, 0x20, 0x30, 0x7F]));
		}

		#[test]
		fn shortFormsExpand() {
			assert_eq!(parseHex("f80"), Ok([0xFF, 0x88, 0x00, OPAQUE]));
			assert_eq!(parseHex("#f808"), Ok([0xFF, 0x88, 0x00, 0x88]));
		}

		#[test]
		fn rejectsBadLengthAndDigits() {
			for hex in ["", "#", "ff", "ff000", "ff00000", "ff0000000", "gg0000", "+f0000", "ff 000", "ффф"] {
				assert_eq!(parseHex(hex), Err(ColorFormatError { hex: hex.to_owned() }), "{hex:?}");
			}
		}
	}
}

pub mod canvas {
	use {
		super::{
			color::{Rgba, OPAQUE},
			PAL_MAX_LEN, RGB_SIZE,
		},
		log::warn,
		png::{BitDepth, ColorType, EncodingError},
		std::io::Write,
	};

	/// Smallest side whose square holds `len` pixels.
	pub fn sideFor(len: usize) -> usize {
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
		let mut side = (len as f64).sqrt() as usize;
		// f64 rounding is off by one for large lengths
		while side * side < len {
			side += 1;
		}
		while side > 0 && (side - 1) * (side - 1) >= len {
			side -= 1;
		}
		side
	}

	pub struct IndexedCanvas {
		pub side: usize,
		/// Row-major palette indices, `side * side` of them.
		pub data: Vec<u8>,
		pub palette: Vec<Rgba>,
	}

	impl IndexedCanvas {
		/// Lays `indices` out row by row from the top-left corner; the unfilled tail stays at index 0.
		pub fn new(indices: &[u8], palette: Vec<Rgba>) -> Self {
			let side = sideFor(indices.len());
			let mut data = vec![0; side * side];
			data[..indices.len()].copy_from_slice(indices);
			Self { side, data, palette }
		}

		/// The palette as it goes into the PNG: at most [`PAL_MAX_LEN`] entries,
		/// padded with opaque black until every index in `data` has a color, even when
		/// the dump brought no colors at all.
		pub fn pngPalette(&self) -> Vec<Rgba> {
			let mut palette = self.palette.clone();
			if palette.len() > PAL_MAX_LEN {
				warn!("palette has {} colors, keeping the first {PAL_MAX_LEN}", palette.len());
				palette.truncate(PAL_MAX_LEN);
			}
			if let Some(&maxIndex) = self.data.iter().max() {
				let requiredLen = usize::from(maxIndex) + 1;
				if palette.len() < requiredLen {
					warn!(
						"area data uses index {maxIndex} but the palette has {} colors, padding with black",
						palette.len()
					);
					palette.resize(requiredLen, [0, 0, 0, OPAQUE]);
				}
			}
			palette
		}

		/// Encodes an 8-bit indexed PNG (`PLTE` plus `tRNS` when some color is translucent).
		pub fn writePng<W: Write>(&self, to: W) -> Result<(), EncodingError> {
			let side = u32::try_from(self.side).map_err(|_| EncodingError::LimitsExceeded)?;
			let palette = self.pngPalette();
			let mut png = png::Encoder::new(to, side, side);
			png.set_depth(BitDepth::Eight);
			png.set_color(ColorType::Indexed);
			png.set_palette(palette.iter().flat_map(|rgba| rgba[..RGB_SIZE].iter().copied()).collect::<Vec<_>>());
			let trnsLen = palette.iter().rposition(|&[.., alpha]| alpha != OPAQUE).map_or(0, |i| i + 1);
			if trnsLen != 0 {
				png.set_trns(palette[..trnsLen].iter().map(|&[.., alpha]| alpha).collect::<Vec<_>>());
			}
			let mut png = png.write_header()?;
			png.write_image_data(&self.data)?;
			png.finish()
		}
	}

}

pub mod dump {
	use {
		super::{
			color::{self, Rgba},
			Error, ParseError,
		},
		base64::{
			alphabet,
			engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
			Engine as _,
		},
		log::{info, warn},
		serde::Deserialize,
		serde_json::Value,
		std::{fs, path::Path},
	};

	/// Standard alphabet, but forgiving about padding and non-zero trailing bits.
	const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
		&alphabet::STANDARD,
		GeneralPurposeConfig::new()
			.with_decode_allow_trailing_bits(true)
			.with_decode_padding_mode(DecodePaddingMode::Indifferent),
	);

	/// Keys that make a dump entry a map area texture.
	pub const SHAPE_KEYS: [&str; 3] = ["mAreaData", "mColorPalette", "mColorToArea"];

	/// One `UFGMapAreaTexture` as the in-game dumper serializes it.
	#[derive(Debug, Deserialize)]
	pub struct MapAreaTexture {
		/// Base64 of one palette index per map pixel.
		pub mAreaData: String,
		pub mColorPalette: Vec<String>,
		pub mColorToArea: Vec<ColorToArea>,
		pub mDataWidth: Option<f64>,
	}

	#[derive(Debug, Deserialize)]
	pub struct ColorToArea {
		pub MapArea: String,
		pub Min: Option<[f64; 2]>,
		pub Max: Option<[f64; 2]>,
	}

	impl MapAreaTexture {
		/// Decodes `mAreaData`, skipping anything outside the base64 alphabet.
		pub fn areaIndices(&self) -> Result<Vec<u8>, Error> {
			let compact: Vec<u8> = self
				.mAreaData
				.bytes()
				.filter(|&byte| byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'/' | b'='))
				.collect();
			Ok(LENIENT_BASE64.decode(compact)?)
		}

		pub fn palette(&self) -> Result<Vec<Rgba>, Error> {
			self.mColorPalette.iter().map(|hex| color::parseHex(hex).map_err(Error::from)).collect()
		}
	}

	pub enum Entry {
		Matched(MapAreaTexture),
		Unmatched(Value),
	}

	impl Entry {
		/// An object holding every [`SHAPE_KEYS`] key is `Matched`, or [`Error::Malformed`]
		/// if those keys hold the wrong types. Anything else is `Unmatched`.
		pub fn classify(value: Value) -> Result<Self, Error> {
			let hasShape =
				value.as_object().is_some_and(|fields| SHAPE_KEYS.iter().all(|key| fields.contains_key(*key)));
			Ok(if hasShape {
				Self::Matched(serde_json::from_value(value).map_err(Error::Malformed)?)
			} else {
				Self::Unmatched(value)
			})
		}
	}

	/// Field names of an object, the JSON type of anything else.
	pub fn describe(value: &Value) -> String {
		match value {
			Value::Object(fields) if fields.is_empty() => "no fields".into(),
			Value::Object(fields) => {
				format!("fields {}", fields.keys().map(String::as_str).collect::<Vec<_>>().join(", "))
			}
			Value::Array(_) => "an array".into(),
			Value::String(_) => "a string".into(),
			Value::Number(_) => "a number".into(),
			Value::Bool(_) => "a boolean".into(),
			Value::Null => "null".into(),
		}
	}

	pub fn load(path: &Path) -> Result<Vec<Value>, Error> {
		let parseError = |source: ParseError| Error::Parse { path: path.to_owned(), source };
		let json = fs::read_to_string(path).map_err(|err| parseError(err.into()))?;
		serde_json::from_str(&json).map_err(|err| parseError(err.into()))
	}

	/// First map area texture in `entries`; later entries are never looked at.
	pub fn findTexture(entries: Vec<Value>) -> Result<Option<MapAreaTexture>, Error> {
		for (i, value) in entries.into_iter().enumerate() {
			match Entry::classify(value)? {
				Entry::Matched(texture) => {
					info!("entry {i} is a map area texture");
					return Ok(Some(texture));
				}
				Entry::Unmatched(raw) => warn!("skipping entry {i}: {}", describe(&raw)),
			}
		}
		Ok(None)
	}

	#[cfg(test)]
	mod tests {
		use {super::*, serde_json::json};

		fn texture(areaData: &str) -> Value {
			json!({
				"mAreaData": areaData,
				"mColorPalette": ["ff0000", "00ff00"],
				"mColorToArea": [{ "MapArea": "A", "Min": [0, 0], "Max": [1, 1] }, { "MapArea": "B" }]
			})
		}

		#[test]
		fn classifiesByKeys() {
			assert!(matches!(Entry::classify(texture("AAEAAQ==")).unwrap(), Entry::Matched(_)));
			let partial = json!({ "mAreaData": "", "mColorPalette": [] });
			assert!(matches!(Entry::classify(partial).unwrap(), Entry::Unmatched(_)));
			assert!(matches!(Entry::classify(json!("mAreaData")).unwrap(), Entry::Unmatched(_)));
		}

		#[test]
		fn mistypedFieldsAreMalformed() {
			let value = json!({ "mAreaData": 4, "mColorPalette": [], "mColorToArea": [] });
			assert!(matches!(Entry::classify(value), Err(Error::Malformed(_))));
		}

		#[test]
		fn decodesAreaData() {
			let Entry::Matched(texture) = Entry::classify(texture("AAEA\nAQ==")).unwrap() else { panic!() };
			assert_eq!(texture.areaIndices().unwrap(), [0, 1, 0, 1]);
			assert_eq!(texture.palette().unwrap(), [[0xFF, 0, 0, 0xFF], [0, 0xFF, 0, 0xFF]]);
			assert_eq!(texture.mColorToArea[0].Max, Some([1.0, 1.0]));
			assert_eq!(texture.mColorToArea[1].Min, None);
		}

		#[test]
		fn areaDataDecodingIsLenient() {
			for areaData in ["AAEA AQ", "AA*EA\tAQ==", "AAEAAR=="] {
				let Entry::Matched(texture) = Entry::classify(texture(areaData)).unwrap() else { panic!() };
				assert_eq!(texture.areaIndices().unwrap(), [0, 1, 0, 1], "{areaData:?}");
			}
			let Entry::Matched(texture) = Entry::classify(texture("A")).unwrap() else { panic!() };
			assert!(matches!(texture.areaIndices(), Err(Error::AreaData(_))));
		}

		#[test]
		fn stopsAtFirstMatch() {
			let entries = vec![json!({ "mFogOfWarTexture": "x" }), texture("AAEAAQ=="), texture("AQEB")];
			assert_eq!(findTexture(entries).unwrap().unwrap().mAreaData, "AAEAAQ==");
			assert!(findTexture(vec![json!(1), json!({})]).unwrap().is_none());
		}

		#[test]
		fn describesEntries() {
			assert_eq!(describe(&json!({ "a": 1, "b": 2 })), "fields a, b");
			assert_eq!(describe(&json!({})), "no fields");
			assert_eq!(describe(&json!([1])), "an array");
		}

		#[test]
		fn loadRequiresJsonArray() {
			let dir = tempfile::tempdir().unwrap();
			let path = dir.path().join("dump.json");
			assert!(matches!(load(&path), Err(Error::Parse { source: ParseError::Io(_), .. })));
			fs::write(&path, r#"{"mAreaData": ""}"#).unwrap();
			assert!(matches!(load(&path), Err(Error::Parse { source: ParseError::Json(_), .. })));
			fs::write(&path, "[1, {}]").unwrap();
			assert_eq!(load(&path).unwrap().len(), 2);
		}
	}
}

/// Prints the palette/area listing of `texture` to `console` and lays its area data out on a square canvas.
pub fn dumpTexture(texture: &MapAreaTexture, console: &mut impl Write) -> Result<IndexedCanvas, Error> {
	macro_rules! say {
		($($arg: tt)*) => {
			writeln!(console, $($arg)*).map_err(Error::Console)?
		};
	}
	let indices = texture.areaIndices()?;
	let areas = &texture.mColorToArea;
	say!("palette has {} colors", texture.mColorPalette.len());
	say!("{} areas", areas.len());
	if texture.mColorPalette.len() != areas.len() {
		warn!("{} colors for {} areas, listing only the pairs", texture.mColorPalette.len(), areas.len());
	}
	for (hex, area) in iter::zip(&texture.mColorPalette, areas) {
		say!("#{hex} is {}", area.MapArea);
		if let (Some(min), Some(max)) = (area.Min, area.Max) {
			debug!("{} spans {min:?}..{max:?}", area.MapArea);
		}
	}
	let palette = texture.palette()?;
	if indices.is_empty() {
		return Err(Error::EmptyAreaData);
	}
	let canvas = IndexedCanvas::new(&indices, palette);
	say!("data length is {}, drawing to {1}x{1}", indices.len(), canvas.side);
	if let Some(dataWidth) = texture.mDataWidth {
		#[allow(clippy::cast_precision_loss)]
		let side = canvas.side as f64;
		if (dataWidth - side).abs() > f64::EPSILON {
			warn!("mDataWidth is {dataWidth} but the area data was drawn {0}x{0}", canvas.side);
		}
	}
	Ok(canvas)
}

/// Renders the first map area texture in the dump at `jsonPath` to the same path with a `.png` extension.
/// Returns `None`, writing nothing, when the dump has no such entry.
pub fn convert(jsonPath: &Path, console: &mut impl Write) -> Result<Option<PathBuf>, Error> {
	let Some(texture) = dump::findTexture(dump::load(jsonPath)?)? else {
		return Ok(None);
	};
	let canvas = dumpTexture(&texture, console)?;
	let pngPath = jsonPath.with_extension("png");
	// an earlier image survives a failed encode
	let png = &mut Vec::<u8>::new();
	canvas.writePng(&mut *png).map_err(|source| Error::Encode { path: pngPath.clone(), source })?;
	fs::write(&pngPath, png).map_err(|source| Error::Write { path: pngPath.clone(), source })?;
	writeln!(console, "wrote {}", pngPath.display()).map_err(Error::Console)?;
	Ok(Some(pngPath))
}
