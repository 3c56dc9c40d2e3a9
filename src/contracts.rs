//! Minimal ABI bindings for the contracts the keeper reads and drives.
//!
//! Only the events it routes and the functions it calls are declared.

use alloy::sol;

sol! {
    interface IInfraMarket {
        event MarketCreated2(
            address indexed incentiveSender,
            address indexed tradingAddr,
            bytes32 indexed desc,
            uint64 launchTs,
            uint64 callDeadline
        );
        event CallMade(
            address indexed tradingAddr,
            bytes8 indexed winner,
            address indexed incentiveRecipient
        );
        event InfraMarketClosed(
            address indexed incentiveRecipient,
            address indexed tradingAddr,
            bytes8 indexed winner
        );
        event CampaignEscaped(address indexed tradingAddr);
        event CommitmentRevealed(
            address indexed trading,
            address indexed revealer,
            bytes8 indexed outcome,
            address caller,
            uint256 bal
        );
        event Declared(
            address indexed trading,
            bytes8 indexed winningOutcome,
            address indexed feeRecipient
        );

        function status(address tradingAddr) external view returns (uint8 state, uint64 remaining);
        function winner(address tradingAddr) external view returns (bytes8 outcome);
        function epochNumber(address tradingAddr) external view returns (uint256 epoch);

        function declare(address tradingAddr, bytes8[] outcomes, address feeRecipient) external returns (uint256);
        function close(address tradingAddr, address feeRecipient) external returns (uint256);
        function escape(address tradingAddr) external;
    }

    interface IBatchSweeper {
        function sweepBatch(
            address infraMarket,
            address tradingAddr,
            uint256 epochNo,
            address[] victims,
            address feeRecipient
        ) external returns (uint256);
    }
}
