//! Tally internals: vote package decryption, counter updates and result
//! pruning.

use super::{ProcessVotes, MAX_OPTIONS, MAX_QUESTIONS};
use ballotchain::{ecies, Error, VotePackage};
use tracing::warn;

/// Decode a vote package, decrypting it first when encryption keys are
/// given. Keys must be passed in the order they were used to encrypt; the
/// layers are peeled starting from the last one.
pub fn unmarshal_vote(vote_package: &[u8], keys: &[[u8; 32]]) -> Result<VotePackage, Error> {
    let mut raw = vote_package.to_vec();
    for key in keys.iter().rev() {
        raw = ecies::decrypt(key, &raw)?;
    }
    VotePackage::decode(&raw)
}

/// An all-zero counter matrix of the maximum dimensions
pub fn empty_process_votes() -> ProcessVotes {
    vec![vec![0u32; MAX_OPTIONS]; MAX_QUESTIONS]
}

/// Add one decoded vote to the counters. Questions beyond the matrix are
/// rejected outright; option overflows are dropped question by question
/// without rejecting the whole vote.
pub fn add_vote_to_counters(pv: &mut ProcessVotes, package: &VotePackage) -> Result<(), Error> {
    if package.votes.len() > MAX_QUESTIONS {
        return Err(Error::BadLength("too many questions in vote package"));
    }
    for (question, &option) in package.votes.iter().enumerate() {
        if option as usize >= MAX_OPTIONS {
            warn!(question, option, "option overflow, dropping from tally");
            continue;
        }
        pv[question][option as usize] += 1;
    }
    Ok(())
}

/// Shrink a counter matrix to the smallest 2-D array preserving every
/// non-zero entry: trailing zero-only questions go first, then trailing
/// zero options within each remaining question.
pub fn prune_vote_result(pv: &mut ProcessVotes) {
    while matches!(pv.last(), Some(question) if question.iter().all(|&count| count == 0)) {
        pv.pop();
    }
    for question in pv.iter_mut() {
        while matches!(question.last(), Some(0)) {
            question.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_trims_trailing_zeros_only() {
        let mut pv = empty_process_votes();
        pv[0][2] = 1;
        pv[2][0] = 3;
        prune_vote_result(&mut pv);
        assert_eq!(pv, vec![vec![0, 0, 1], vec![], vec![3]]);
    }

    #[test]
    fn prune_of_empty_matrix_is_empty() {
        let mut pv = empty_process_votes();
        prune_vote_result(&mut pv);
        assert!(pv.is_empty());
    }

    #[test]
    fn option_overflow_is_dropped_not_fatal() {
        let mut pv = empty_process_votes();
        let package = VotePackage {
            nonce: String::new(),
            package_type: String::new(),
            votes: vec![1, MAX_OPTIONS as u32 + 5, 0],
        };
        add_vote_to_counters(&mut pv, &package).unwrap();
        assert_eq!(pv[0][1], 1);
        assert_eq!(pv[2][0], 1);
        assert_eq!(pv[1].iter().sum::<u32>(), 0);
    }

    #[test]
    fn question_overflow_rejects_package() {
        let mut pv = empty_process_votes();
        let package = VotePackage {
            nonce: String::new(),
            package_type: String::new(),
            votes: vec![0; MAX_QUESTIONS + 1],
        };
        assert!(add_vote_to_counters(&mut pv, &package).is_err());
    }

    #[test]
    fn unmarshal_plaintext_and_encrypted() {
        let package = VotePackage::new(vec![2]);
        let encoded = package.encode().unwrap();
        assert_eq!(unmarshal_vote(&encoded, &[]).unwrap(), package);

        let keys = ballotchain::ProcessKeys::derive(
            &ballotchain::util::random_bytes32(),
            &ballotchain::ProcessId::from([1u8; 32]),
            1,
        )
        .unwrap();
        let encrypted = ecies::encrypt(&keys.public_key, &encoded).unwrap();
        assert_eq!(
            unmarshal_vote(&encrypted, &[keys.private_key]).unwrap(),
            package
        );

        // a wrong key fails decryption
        let wrong = ballotchain::util::random_bytes32();
        assert!(unmarshal_vote(&encrypted, &[wrong]).is_err());
    }
}
