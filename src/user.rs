//! Claims-bearing principal attached to a request.

/// Claim kind carrying the user's unique identifier.
pub const NAME_IDENTIFIER: &str = "nameidentifier";

/// A named attribute of an authenticated principal.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Claim {
    pub kind: String,
    pub value: String,
}

impl Claim {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: kind.into(), value: value.into() }
    }
}

/// The current user of a request.
///
/// A user without any claim carries no identity and is treated as
/// unauthenticated by the security guards.
#[derive(Clone, Debug, Default)]
pub struct User {
    claims: Vec<Claim>,
}

impl User {
    /// A user identified by `name`, holding `claims` plus a
    /// [`NAME_IDENTIFIER`] claim for the name.
    pub fn new(name: impl Into<String>, claims: impl IntoIterator<Item = Claim>) -> Self {
        let mut claims: Vec<Claim> = claims.into_iter().collect();
        claims.push(Claim::new(NAME_IDENTIFIER, name));
        Self { claims }
    }

    /// A principal with no identity at all.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_claims(claims: impl IntoIterator<Item = Claim>) -> Self {
        Self { claims: claims.into_iter().collect() }
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn is_authenticated(&self) -> bool {
        !self.claims.is_empty()
    }

    /// Value of the first [`NAME_IDENTIFIER`] claim.
    pub fn identifier(&self) -> Option<&str> {
        self.find_first(NAME_IDENTIFIER).map(|c| c.value.as_str())
    }

    pub fn find_first(&self, kind: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.kind == kind)
    }

    pub fn has_claim(&self, predicate: impl Fn(&Claim) -> bool) -> bool {
        self.claims.iter().any(predicate)
    }
}
