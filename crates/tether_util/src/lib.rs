#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	/// Schemes accepted for the message broker URL.
	pub const BUS_SCHEMES: [&str; 2] = ["nats", "tls"];

	/// Parsed `nats://host:port` (or `tls://host:port`) broker endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct BusEndpoint {
		pub scheme: String,
		pub host: String,
		pub port: u16,
	}

	impl BusEndpoint {
		/// Default broker port when the URL omits one.
		pub const DEFAULT_PORT: u16 = 4222;

		/// Returns `host:port` (IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Canonical `scheme://host:port` form handed to the broker client.
		pub fn url(&self) -> String {
			format!("{}://{}", self.scheme, self.hostport())
		}

		/// Parse `scheme://host[:port]`. Credentials, paths and queries are rejected.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("broker url must be non-empty (expected nats://host:port)".to_string());
			}

			let (scheme, rest) = s
				.split_once("://")
				.ok_or_else(|| format!("invalid broker url (expected nats://host:port): {s}"))?;

			let scheme = scheme.to_ascii_lowercase();
			if !BUS_SCHEMES.contains(&scheme.as_str()) {
				return Err(format!("unsupported broker scheme {scheme:?} (expected one of {BUS_SCHEMES:?})"));
			}

			if rest.contains('@') {
				return Err(format!("broker url must not embed credentials: {scheme}://..."));
			}

			if rest.contains('/') || rest.contains('?') || rest.contains('#') {
				return Err(format!("invalid broker url (no path/query/fragment allowed): {s}"));
			}

			let (host, port) = split_host_port(rest).map_err(|e| format!("{e}: {s}"))?;

			Ok(Self {
				scheme,
				host,
				port: port.unwrap_or(Self::DEFAULT_PORT),
			})
		}
	}

	fn split_host_port(rest: &str) -> Result<(String, Option<u16>), String> {
		// bracketed IPv6, with or without port
		if let Some(after_open) = rest.strip_prefix('[') {
			let (inner, tail) = after_open
				.split_once(']')
				.ok_or_else(|| "unterminated IPv6 bracket".to_string())?;
			if inner.is_empty() {
				return Err("empty host".to_string());
			}
			let host = format!("[{inner}]");
			return match tail {
				"" => Ok((host, None)),
				t => {
					let port = t.strip_prefix(':').ok_or_else(|| "garbage after IPv6 host".to_string())?;
					Ok((host, Some(parse_port(port)?)))
				}
			};
		}

		match rest.rsplit_once(':') {
			Some((host, _)) if host.contains(':') => {
				Err("IPv6 hosts must be bracketed like nats://[::1]:4222".to_string())
			}
			Some((host, port)) => {
				let host = host.trim();
				if host.is_empty() {
					return Err("empty host".to_string());
				}
				Ok((host.to_string(), Some(parse_port(port)?)))
			}
			None => {
				let host = rest.trim();
				if host.is_empty() {
					return Err("empty host".to_string());
				}
				Ok((host.to_string(), None))
			}
		}
	}

	fn parse_port(s: &str) -> Result<u16, String> {
		match s.trim().parse::<u16>() {
			Ok(0) | Err(_) => Err("invalid port (expected 1..=65535)".to_string()),
			Ok(p) => Ok(p),
		}
	}

	/// Parse a `host:port` listener address; the host must be an IP literal.
	pub fn parse_bind_addr(s: &str) -> Result<SocketAddr, String> {
		let s = s.trim();
		s.parse::<SocketAddr>()
			.map_err(|_| format!("invalid bind address (expected ip:port, e.g. 0.0.0.0:9090): {s}"))
	}

}
