use alloy_sol_types::sol;

// Only the surface the indexer reads is declared here.

sol! {
    /// VeilPool interface (fixed-denomination ETH pool)
    #[derive(Debug, PartialEq, Eq)]
    interface IVeilPool {
        /// Validator contract gating deposits
        function validatorContract() external view returns (address);

        /// Deployer that created the pool
        function veilDeployer() external view returns (address);

        /// Events
        event Deposit(
            bytes32 indexed commitment,
            address indexed sender,
            uint32 leafIndex,
            uint256 timestamp
        );

        event Withdrawal(
            address to,
            bytes32 nullifierHash,
            address indexed relayer,
            uint256 fee,
            uint256 timestamp
        );

        event UpdateVerifiedDepositor(address newVeilVerifier);
    }
}
