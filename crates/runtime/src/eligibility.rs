//! Which page addresses may be attached to.

/// Browser-internal schemes the debugging backend refuses to attach to.
const PRIVILEGED_SCHEMES: &[&str] = &[
	"chrome",
	"chrome-extension",
	"chrome-search",
	"chrome-untrusted",
	"devtools",
	"edge",
	"brave",
	"opera",
	"vivaldi",
	"view-source",
];

/// A page is eligible iff its address is non-empty and not privileged.
pub fn is_eligible(url: &str) -> bool {
	let url = url.trim();
	if url.is_empty() {
		return false;
	}
	match url.split_once(':') {
		Some((scheme, _)) => !PRIVILEGED_SCHEMES.iter().any(|s| scheme.eq_ignore_ascii_case(s)),
		None => true,
	}
}
