use crate::internal::common::Map;
use crate::internal::common::ids::ClaimToken;
use crate::internal::server::claim::Claim;

/// Claim table keyed by token, with a secondary index by resource name.
/// The two are kept consistent here; nobody else mutates them.
#[derive(Default)]
pub struct ClaimMap {
    claims: Map<ClaimToken, Claim>,
    by_name: Map<String, ClaimToken>,
}

impl ClaimMap {
    pub fn insert(&mut self, claim: Claim) {
        let token = claim.token.clone();
        assert!(
            self.by_name
                .insert(claim.name().to_string(), token.clone())
                .is_none()
        );
        assert!(self.claims.insert(token, claim).is_none());
    }

    pub fn remove(&mut self, token: &ClaimToken) -> Option<Claim> {
        let claim = self.claims.remove(token)?;
        self.by_name.remove(claim.name());
        Some(claim)
    }

    #[inline]
    pub fn find(&self, token: &ClaimToken) -> Option<&Claim> {
        self.claims.get(token)
    }

    #[inline]
    pub fn find_mut(&mut self, token: &ClaimToken) -> Option<&mut Claim> {
        self.claims.get_mut(token)
    }

    #[inline]
    pub fn get(&self, token: &ClaimToken) -> &Claim {
        self.claims.get(token).unwrap_or_else(|| {
            panic!("Asking for invalid claim token={token}");
        })
    }

    #[inline]
    pub fn get_mut(&mut self, token: &ClaimToken) -> &mut Claim {
        self.claims.get_mut(token).unwrap_or_else(|| {
            panic!("Asking for invalid claim token={token}");
        })
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Claim> {
        self.by_name.get(name).map(|token| self.get(token))
    }

    pub fn token_by_name(&self, name: &str) -> Option<&ClaimToken> {
        self.by_name.get(name)
    }

    #[inline]
    pub fn contains(&self, token: &ClaimToken) -> bool {
        self.claims.contains_key(token)
    }

    #[inline]
    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    #[inline]
    pub fn claims_mut(&mut self) -> impl Iterator<Item = &mut Claim> {
        self.claims.values_mut()
    }

    #[inline]
    pub fn tokens(&self) -> impl Iterator<Item = &ClaimToken> {
        self.claims.keys()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
