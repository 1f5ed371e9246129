//! Random hash generation, intended for use in testing

use super::Hash256;
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};

impl Distribution<Hash256> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Hash256 {
        Hash256(rng.gen())
    }
}
