// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::contract::abigen;

// Source chain proof-of-personhood registry. Only the lookup is bound here,
// the completion event is matched through a configurable signature.
abigen!(
    ProofOfHuman,
    r#"[
        function verifiedHumans(address user) external view returns (address userAddress, uint256 timestamp, string gender, string nationality, uint256 minimumAge)
    ]"#,
);

// Target chain flag store written by the relayer identity.
abigen!(
    CentralWallet,
    r#"[
        function isHumanVerified(address user) external view returns (bool)
        function setVerifiedHuman(address user, bool isVerified) external
    ]"#,
);
