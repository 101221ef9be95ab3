//! ERC-20 surface needed to read payments: the `Transfer` event and `symbol()`.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface ERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
        function symbol() external view returns (string);
    }
}
