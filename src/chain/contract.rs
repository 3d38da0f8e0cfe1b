use alloy::sol;

sol! {
    /// Subset of the data-request router the provider daemon talks to.
    #[allow(missing_docs)]
    interface OracleRouter {
        event DataRequested(
            address indexed consumer,
            address indexed provider,
            uint256 fee,
            bytes32 data,
            bytes32 requestId
        );

        event RequestFulfilled(
            address indexed consumer,
            address indexed provider,
            bytes32 indexed requestId,
            uint256 requestedData
        );

        function fulfillRequest(bytes32 requestId, uint256 priceData, bytes signature) external returns (bool);

        function registerAsProvider(uint256 minFee) external returns (bool);
        function setProviderMinFee(uint256 newMinFee) external returns (bool);
        function setProviderGranularFee(address consumer, uint256 newFee) external returns (bool);
        function withdraw(uint256 amount) external;
        function withdrawTo(address to, uint256 amount) external;

        function getWithdrawableTokens(address provider) external view returns (uint256);
        function getProviderMinFee(address provider) external view returns (uint256);
        function getProviderGranularFee(address provider, address consumer) external view returns (uint256);
    }
}
