// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! PyObjC.

The framework wrappers (`Foundation`, `AppKit`, ...) resolve most of their
names lazily from metadata shipped next to the package, and `objc` star
imports its extension module. From-imports of those names look like
missing submodules to the graph.
*/

use {
    super::{RecipeContext, RecipeGraph, RecipeInfo, RecipeRegistry},
    anyhow::Result,
    python_packaging::graph::NodeKind,
};

/// Top-level packages installed by the `pyobjc-framework-*` distributions.
static FRAMEWORK_WRAPPERS: &[&str] = &[
    "AVFAudio", "AVFoundation", "AVKit", "AVRouting", "Accessibility", "Accounts",
    "AdServices", "AdSupport", "AddressBook", "AppTrackingTransparency", "AppleScriptKit",
    "AppleScriptObjC", "ApplicationServices", "HIServices", "PrintCore",
    "AudioVideoBridging", "AuthenticationServices", "AutomaticAssessmentConfiguration",
    "Automator", "BackgroundAssets", "BrowserEngineKit", "BusinessChat", "CFNetwork",
    "CalendarStore", "CallKit", "Carbon", "Cinematic", "ClassKit", "CloudKit", "AppKit",
    "CGL", "Cocoa", "CoreFoundation", "Foundation", "PyObjCTools", "Collaboration",
    "ColorSync", "Contacts", "ContactsUI", "CoreAudio", "CoreAudioKit", "CoreBluetooth",
    "CoreData", "CoreHaptics", "CoreLocation", "CoreMIDI", "CoreML", "CoreMedia",
    "CoreMediaIO", "CoreMotion", "CoreServices", "CoreSpotlight", "CoreText", "CoreWLAN",
    "CryptoTokenKit", "DVDPlayback", "DataDetection", "DeviceCheck", "DictionaryServices",
    "DiscRecording", "DiscRecordingUI", "DiskArbitration", "EventKit", "ExceptionHandling",
    "ExecutionPolicy", "ExtensionKit", "ExternalAccessory", "FSEvents", "FSKit",
    "FileProvider", "FileProviderUI", "FinderSync", "GameCenter", "GameController",
    "GameKit", "GameplayKit", "HealthKit", "IOBluetooth", "IOBluetoothUI", "IOSurface",
    "ImageCaptureCore", "InputMethodKit", "InstallerPlugins", "InstantMessage", "Intents",
    "IntentsUI", "KernelManagement", "LatentSemanticMapping", "LaunchServices",
    "LinkPresentation", "LocalAuthentication", "LocalAuthenticationEmbeddedUI",
    "MLCompute", "MailKit", "MapKit", "MediaAccessibility", "MediaExtension",
    "MediaLibrary", "MediaPlayer", "MediaToolbox", "Metal", "MetalFX", "MetalKit",
    "MetalPerformanceShaders", "MetalPerformanceShadersGraph", "MetricKit", "ModelIO",
    "MultipeerConnectivity", "NaturalLanguage", "NetFS", "Network", "NetworkExtension",
    "NotificationCenter", "OSAKit", "OSLog", "CFOpenDirectory", "OpenDirectory", "PHASE",
    "PassKit", "PencilKit", "Photos", "PhotosUI", "PreferencePanes", "PubSub", "PushKit",
    "Quartz", "QuickLookThumbnailing", "ReplayKit", "SafariServices", "SafetyKit",
    "SceneKit", "ScreenCaptureKit", "ScreenSaver", "ScreenTime", "ScriptingBridge",
    "SearchKit", "Security", "SecurityFoundation", "SecurityInterface",
    "SensitiveContentAnalysis", "ServiceManagement", "SharedWithYou", "SharedWithYouCore",
    "ShazamKit", "Social", "SoundAnalysis", "Speech", "SpriteKit", "StoreKit", "Symbols",
    "SyncServices", "SystemConfiguration", "SystemExtensions", "ThreadNetwork",
    "UniformTypeIdentifiers", "UserNotifications", "UserNotificationsUI",
    "VideoSubscriberAccount", "VideoToolbox", "Virtualization", "Vision", "JavaScriptCore",
    "WebKit", "iTunesLibrary", "dispatch", "libdispatch", "xpc",
];

/// Mark missing `package.<name>` nodes as expected.
fn expect_missing_children(graph: &mut RecipeGraph, package: &str) {
    let prefix = format!("{}.", package);
    let missing = graph
        .nodes()
        .filter(|(_, node)| {
            node.kind == NodeKind::MissingModule && node.identifier.starts_with(&prefix)
        })
        .map(|(id, _)| id)
        .collect::<Vec<_>>();

    for id in missing {
        graph.set_expected_missing(id);
    }
}

fn pyobjc(graph: &mut RecipeGraph, _context: &RecipeContext) -> Result<()> {
    if graph.find_module("objc").is_some() {
        expect_missing_children(graph, "objc");
    }

    for name in FRAMEWORK_WRAPPERS {
        if let Some(id) = graph.find_module(name) {
            graph.mark_zipunsafe(id);
            expect_missing_children(graph, name);
        }
    }

    Ok(())
}

pub fn register(registry: &mut RecipeRegistry) {
    registry.register(
        RecipeInfo::new("pyobjc", pyobjc)
            .distribution("pyobjc-core")
            .modules(&["objc"]),
    );
}
