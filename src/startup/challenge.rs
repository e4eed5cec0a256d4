use crate::{Error, Result, startup::HashAlgorithm};

const MIN_SALT_LEN: usize = 8;
const MIN_FIELDS: usize = 6;

/// The kind of process that issued a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Front-end supervisor; the login will be redirected to the
    /// process hosting the database.
    Merovingian,
    Monetdb,
    Mserver,
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merovingian" => Ok(Backend::Merovingian),
            "monetdb" => Ok(Backend::Monetdb),
            "mserver" => Ok(Backend::Mserver),
            _ => Err(invalid(format!("unknown backend '{s}'"))),
        }
    }
}

/// The challenge line a server sends when a client connects:
/// `salt:backend:version:saltHashes:endianness:passwordHash:...:`
#[derive(Debug, Clone)]
pub struct ServerChallenge {
    salt: String,
    backend: Backend,
    version: u32,
    salt_hashes: Vec<String>,
    endianness: String,
    password_hash: String,
}

fn invalid(detail: impl std::fmt::Display) -> Error {
    Error::MalformedResponse(format!("invalid server challenge: {detail}"))
}

impl ServerChallenge {
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim_end().split(':').collect();
        // the trailing ':' leaves an empty last element
        let count = parts.len().saturating_sub(1);
        if count < MIN_FIELDS {
            return Err(invalid(format!(
                "it contains {count} fields, should be at least {MIN_FIELDS}"
            )));
        }

        let salt = parts[0].trim().to_string();
        if salt.len() < MIN_SALT_LEN {
            return Err(invalid(format!(
                "the salt is shorter than {MIN_SALT_LEN} characters"
            )));
        }

        let backend = parts[1].trim().parse()?;

        let version = parts[2]
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v >= 1)
            .ok_or_else(|| invalid(format!("invalid version field '{}'", parts[2])))?;

        let salt_hashes: Vec<String> = parts[3]
            .split(',')
            .map(|h| h.trim().to_ascii_uppercase())
            .filter(|h| !h.is_empty())
            .collect();
        if salt_hashes.is_empty() {
            return Err(invalid("empty list of salt hashes"));
        }

        let password_hash = parts[5].trim().to_ascii_uppercase();
        if password_hash.is_empty() {
            return Err(invalid("empty password hash field"));
        }

        Ok(ServerChallenge {
            salt,
            backend,
            version,
            salt_hashes,
            endianness: parts[4].trim().to_string(),
            password_hash,
        })
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Upper case names of the algorithms the server accepts for salting.
    pub fn salt_hashes(&self) -> &[String] {
        &self.salt_hashes
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    /// The protocol tag to open the login line with.
    pub fn protocol_tag(&self) -> &str {
        match self.endianness.as_str() {
            "" => "LIT",
            tag => tag,
        }
    }

    /// `hash(salt_algo, hex(hash(password_algo, password)) + salt)`
    pub fn hash_password(&self, password: &str, salt_algo: HashAlgorithm) -> Result<String> {
        let password_algo: HashAlgorithm = self.password_hash.parse().map_err(|_| {
            Error::UnsupportedAlgorithm(format!(
                "the password hash '{}' requested by the server is not available locally",
                self.password_hash
            ))
        })?;

        if !self.salt_hashes.iter().any(|h| h == salt_algo.name()) {
            return Err(Error::UnsupportedAlgorithm(format!(
                "the salt hash '{salt_algo}' is not supported by the server, it accepts: {}",
                self.salt_hashes.join(", ")
            )));
        }

        let mut salted = password_algo.hex_digest(password.as_bytes());
        salted.push_str(&self.salt);
        Ok(salt_algo.hex_digest(salted.as_bytes()))
    }

    /// Builds the login line answering this challenge.
    pub fn login_line(
        &self,
        user: &str,
        password: &str,
        database: &str,
        salt_algo: HashAlgorithm,
    ) -> Result<String> {
        let digest = self.hash_password(password, salt_algo)?;
        Ok(format!(
            "{}:{user}:{{{salt_algo}}}{digest}:sql:{database}:\n",
            self.protocol_tag()
        ))
    }
}
